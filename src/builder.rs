//! Step-by-step construction of a [`TimeCoordinator`](crate::TimeCoordinator).

use std::sync::Arc;

use crate::clock::{Clock, MatchClock, MonotonicClock};
use crate::config::TimeSyncConfig;
use crate::error::{InvalidRequestKind, TimeSyncError};
use crate::telemetry::ViolationObserver;
use crate::time_coordinator::TimeCoordinator;
use crate::{PeerSender, DEFAULT_MAX_PLAYERS};

/// The [`TimeCoordinatorBuilder`] builds a [`TimeCoordinator`] for one match.
///
/// After setting all appropriate values, use [`build`](Self::build) to consume
/// the builder.
///
/// ```
/// use duel_timesync::{PeerSender, PlayerId, SyncMessage, TimeCoordinatorBuilder, TimeSyncConfig};
///
/// struct RoomSender;
/// impl PeerSender for RoomSender {
///     fn forward(&mut self, _player: PlayerId, _message: SyncMessage) {}
/// }
///
/// let coordinator = TimeCoordinatorBuilder::new()
///     .with_config(TimeSyncConfig::default())
///     .with_max_players(2)?
///     .build(RoomSender)?;
/// assert!(!coordinator.is_started());
/// # Ok::<(), duel_timesync::TimeSyncError>(())
/// ```
#[must_use = "TimeCoordinatorBuilder must be consumed by calling build()"]
pub struct TimeCoordinatorBuilder {
    config: TimeSyncConfig,
    max_players: usize,
    clock: Option<Box<dyn Clock>>,
    /// Optional observer for rejected actions and invalid pongs.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for TimeCoordinatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            config,
            max_players,
            clock,
            violation_observer,
        } = self;

        f.debug_struct("TimeCoordinatorBuilder")
            .field("config", config)
            .field("max_players", max_players)
            .field("has_custom_clock", &clock.is_some())
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl Default for TimeCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeCoordinatorBuilder {
    /// Construct a new builder with the production policy, two player slots and a monotonic clock.
    pub fn new() -> Self {
        Self {
            config: TimeSyncConfig::default(),
            max_players: DEFAULT_MAX_PLAYERS,
            clock: None,
            violation_observer: None,
        }
    }

    /// Sets the timing policy. It is validated in [`build`](Self::build).
    pub fn with_config(mut self, config: TimeSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Change the number of player slots. Default is 2.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSyncError::InvalidRequest`] if `max_players` is 0.
    pub fn with_max_players(mut self, max_players: usize) -> Result<Self, TimeSyncError> {
        if max_players == 0 {
            return Err(InvalidRequestKind::ZeroPlayers.into());
        }
        self.max_players = max_players;
        Ok(self)
    }

    /// Reads match time from `clock` instead of the system's monotonic clock.
    ///
    /// Mostly useful with [`ManualClock`](crate::ManualClock) in tests and simulations.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Sets a custom observer for rejected actions, invalid pongs and broken invariants.
    ///
    /// If no observer is set, violations are logged via the `tracing` crate.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Consumes the builder and creates a coordinator that sends pings through `sender`.
    ///
    /// The coordinator is not started; call [`TimeCoordinator::start`] when the match begins.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSyncError::InvalidConfig`] if the policy fails
    /// [`TimeSyncConfig::validate`].
    pub fn build(
        self,
        sender: impl PeerSender + 'static,
    ) -> Result<TimeCoordinator, TimeSyncError> {
        self.config.validate()?;

        let clock: Box<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Box::new(MonotonicClock::new()),
        };

        Ok(TimeCoordinator::new(
            self.config,
            self.max_players,
            MatchClock::new(clock),
            Box::new(sender),
            self.violation_observer,
        ))
    }
}
