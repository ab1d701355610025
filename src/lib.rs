//! # duel-timesync
//!
//! Server-authoritative clock synchronization and action-timing validation for
//! real-time, two-player duel matches.
//!
//! Every match owns one [`TimeCoordinator`]. It keeps a single monotonic server
//! clock, pings each connected player on a fixed schedule, turns the returned
//! pongs into a median-filtered clock offset, and gates every gameplay action
//! through four ordered checks (sync presence, monotonic client time, burst
//! rate, cumulative drift) before the host is allowed to apply it.
//!
//! The host stays in charge of I/O: outgoing pings go through a [`PeerSender`]
//! you implement, incoming pongs and actions are handed to the coordinator, and
//! the ping schedule advances whenever you call [`TimeCoordinator::poll`] (or
//! let [`PingDriver`] do it on a tokio runtime).
//!
//! ```
//! use duel_timesync::{
//!     ManualClock, PeerSender, PlayerId, SyncMessage, TimeCoordinatorBuilder, TimingAssessment,
//! };
//!
//! struct NullSender;
//! impl PeerSender for NullSender {
//!     fn forward(&mut self, _player: PlayerId, _message: SyncMessage) {}
//! }
//!
//! let clock = ManualClock::new();
//! let mut coordinator = TimeCoordinatorBuilder::new()
//!     .with_clock(clock.clone())
//!     .build(NullSender)?;
//!
//! coordinator.add_player_session(PlayerId::new(0))?;
//! coordinator.start();
//!
//! clock.advance(750.0);
//! match coordinator.assess_timing(PlayerId::new(0), 750.0) {
//!     TimingAssessment::Accepted(server_time) => {
//!         // apply the action, then commit it
//!         coordinator.update_last_action_time(PlayerId::new(0), "set_cell", 750.0);
//!         assert!(server_time >= 0.0);
//!     },
//!     TimingAssessment::Rejected(reason) => panic!("unexpected rejection: {reason}"),
//! }
//! # Ok::<(), duel_timesync::TimeSyncError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt::Debug;

pub use action_validator::{ActionRecord, ActionValidator, RejectReason, TimingAssessment};
pub use builder::TimeCoordinatorBuilder;
pub use client::ClientTimeCoordinator;
pub use clock::{Clock, ManualClock, MatchClock, MonotonicClock};
pub use config::TimeSyncConfig;
#[cfg(feature = "tokio")]
pub use driver::PingDriver;
pub use error::{InvalidRequestKind, TimeSyncError};
pub use messages::{Ping, Pong, SyncMessage};
pub use sync_stats::{SyncQuality, SyncStats};
pub use time_coordinator::{PongOutcome, TimeCoordinator};

pub mod action_validator;
pub mod builder;
pub mod client;
pub mod clock;
pub mod config;
#[cfg(feature = "tokio")]
pub mod driver;
pub mod error;
pub mod messages;
#[doc(hidden)]
pub mod pending_pings;
#[doc(hidden)]
pub mod ping_coordinator;
#[doc(hidden)]
pub mod player_table;
pub mod sync_profile;
pub mod sync_stats;
pub mod telemetry;
pub mod time_coordinator;

/// Internal module exposing implementation details for testing and benchmarking.
///
/// # ⚠️ WARNING: No Stability Guarantees
///
/// Nothing in here is covered by semver. The facade ([`TimeCoordinator`]) is the
/// supported entry point; these components are exposed so property tests and
/// benchmarks can drive them directly.
#[doc(hidden)]
pub mod __internal {
    pub use crate::pending_pings::PendingPingStore;
    pub use crate::ping_coordinator::PingCoordinator;
    pub use crate::player_table::PlayerTable;
    pub use crate::sync_profile::SyncProfile;
}

// #############
// # CONSTANTS #
// #############

/// Interval between scheduled ping passes, in milliseconds.
pub const PING_INTERVAL_MS: f64 = 2000.0;

/// A player is not pinged again until its newest outstanding ping is at least this old.
pub const MIN_PING_INTERVAL_MS: f64 = 500.0;

/// Outstanding pings per player before the circuit breaker trips.
pub const MAX_PENDING_PINGS: usize = 10;

/// Outstanding pings older than this are forgotten, in milliseconds.
pub const MAX_PING_AGE_MS: f64 = 10_000.0;

/// Number of offset samples kept for median filtering.
pub const PING_SAMPLE_SIZE: usize = 5;

/// Committed actions remembered per player.
pub const MAX_ACTION_HISTORY_COUNT: usize = 30;

/// Largest tolerated divergence between client and server elapsed time, in milliseconds.
pub const MAX_CUMULATIVE_DRIFT_MS: f64 = 50.0;

/// Actions allowed inside one rate-limit window.
pub const RATE_LIMIT_ACTIONS: usize = 5;

/// Length of the rate-limit window, in milliseconds.
pub const RATE_LIMIT_WINDOW_MS: f64 = 500.0;

/// Default number of player slots in a match (a duel).
pub const DEFAULT_MAX_PLAYERS: usize = 2;

/// Identifies a player within one match.
///
/// Player ids are small, dense slot numbers: in a duel they are `0` and `1`.
/// They index directly into every per-player table the coordinator keeps, so
/// the profile, the ping ledger and the action history of a player always
/// live at the same slot.
///
/// # Examples
///
/// ```
/// use duel_timesync::PlayerId;
///
/// let host = PlayerId::new(0);
/// let guest = PlayerId::new(1);
///
/// assert!(guest.is_valid_for(2));
/// assert!(!PlayerId::new(2).is_valid_for(2));
/// assert_eq!(host.as_usize(), 0);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PlayerId(usize);

impl PlayerId {
    /// Creates a new `PlayerId` from a slot number.
    ///
    /// Note: This does not validate the slot against a match size.
    /// Use [`is_valid_for()`](Self::is_valid_for) for that.
    #[inline]
    #[must_use]
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Returns the underlying slot number.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns `true` if this id addresses a slot in a match with `max_players` slots.
    #[inline]
    #[must_use]
    pub const fn is_valid_for(self, max_players: usize) -> bool {
        self.0 < max_players
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for PlayerId {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<PlayerId> for usize {
    #[inline]
    fn from(player: PlayerId) -> Self {
        player.0
    }
}

// #############
// #  TRAITS   #
// #############

/// Outbound half of the transport, implemented by the host's room layer.
///
/// The coordinator calls [`forward`](Self::forward) whenever a ping has to go
/// out. Delivery is fire-and-forget: a dropped ping simply never gets a
/// matching pong and ages out of the ledger.
#[cfg(feature = "sync-send")]
pub trait PeerSender: Send + Sync {
    /// Sends `message` to `player`, encoded under [`SyncMessage::action_name`].
    fn forward(&mut self, player: PlayerId, message: SyncMessage);
}

/// Outbound half of the transport, implemented by the host's room layer.
///
/// The coordinator calls [`forward`](Self::forward) whenever a ping has to go
/// out. Delivery is fire-and-forget: a dropped ping simply never gets a
/// matching pong and ages out of the ledger.
#[cfg(not(feature = "sync-send"))]
pub trait PeerSender {
    /// Sends `message` to `player`, encoded under [`SyncMessage::action_name`].
    fn forward(&mut self, player: PlayerId, message: SyncMessage);
}

impl<S: PeerSender + ?Sized> PeerSender for Box<S> {
    fn forward(&mut self, player: PlayerId, message: SyncMessage) {
        (**self).forward(player, message);
    }
}

// ###################
// # UNIT TESTS      #
// ###################
