//! The per-match facade the rest of the server talks to.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::action_validator::{ActionValidator, TimingAssessment};
use crate::clock::MatchClock;
use crate::config::TimeSyncConfig;
use crate::error::{InvalidRequestKind, TimeSyncError};
use crate::pending_pings::PendingPingStore;
use crate::ping_coordinator::PingCoordinator;
use crate::player_table::PlayerTable;
use crate::sync_profile::SyncProfile;
use crate::sync_stats::SyncStats;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, PeerSender, PlayerId};

/// What [`TimeCoordinator::handle_pong`] did with a pong.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PongOutcome {
    /// The pong matched an outstanding ping and updated the player's profile.
    Applied {
        /// Measured round-trip time in milliseconds.
        rtt: f64,
        /// Raw offset observation (before median filtering).
        offset: f64,
    },
    /// The pong did not match an outstanding ping and was dropped.
    Discarded,
}

impl PongOutcome {
    /// Returns `true` for [`PongOutcome::Applied`].
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Clock synchronization and action-timing validation for one match.
///
/// A `TimeCoordinator` is created through [`TimeCoordinatorBuilder`] and is
/// driven entirely by the host:
///
/// - [`start`](Self::start) when the match begins,
/// - [`poll`](Self::poll) regularly from the room's event loop,
/// - [`handle_pong`](Self::handle_pong) for every incoming `PONG`,
/// - [`assess_timing`](Self::assess_timing) before applying a gameplay action and
///   [`update_last_action_time`](Self::update_last_action_time) after applying it,
/// - [`close`](Self::close) when the room is torn down.
///
/// All methods take `&mut self` (or `&self`) and never block. Handlers for a
/// single match must run sequentially; wrap the coordinator in a mutex if
/// they can run on different threads.
///
/// [`TimeCoordinatorBuilder`]: crate::TimeCoordinatorBuilder
pub struct TimeCoordinator {
    config: TimeSyncConfig,
    max_players: usize,
    clock: MatchClock,
    profiles: PlayerTable<SyncProfile>,
    pending: PendingPingStore,
    validator: ActionValidator,
    scheduler: PingCoordinator,
    sender: Box<dyn PeerSender>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    closed: bool,
}

impl std::fmt::Debug for TimeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeCoordinator")
            .field("config", &self.config)
            .field("max_players", &self.max_players)
            .field("clock", &self.clock)
            .field("profiles", &self.profiles)
            .field("pending", &self.pending)
            .field("validator", &self.validator)
            .field("scheduler", &self.scheduler)
            .field("has_violation_observer", &self.violation_observer.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TimeCoordinator {
    pub(crate) fn new(
        config: TimeSyncConfig,
        max_players: usize,
        clock: MatchClock,
        sender: Box<dyn PeerSender>,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            max_players,
            clock,
            profiles: PlayerTable::new(),
            pending: PendingPingStore::with_limits(config.max_pending_pings, config.max_ping_age_ms()),
            validator: ActionValidator::new(&config, violation_observer.clone()),
            scheduler: PingCoordinator::from_config(&config),
            sender,
            violation_observer,
            config,
            closed: false,
        }
    }

    /// Starts the match clock at zero and begins pinging every tracked player.
    ///
    /// Calling this again, or after [`close`](Self::close), does nothing.
    pub fn start(&mut self) {
        if self.closed {
            warn!("Ignoring start() on a closed time coordinator");
            return;
        }
        if !self.clock.start() {
            debug!("Time coordinator already started");
            return;
        }
        debug!("Match clock started with {} player(s)", self.profiles.len());
        self.scheduler.start_ping_service(
            0.0,
            &self.profiles,
            &mut self.pending,
            &mut *self.sender,
        );
    }

    /// Runs a ping pass if one is due. Returns the number of pings sent.
    ///
    /// Call this from the host's event loop at least as often as the ping
    /// interval. Does nothing before [`start`](Self::start) or after
    /// [`close`](Self::close).
    pub fn poll(&mut self) -> usize {
        let Ok(now) = self.clock.server_time() else {
            return 0;
        };
        if self.closed {
            return 0;
        }
        self.scheduler
            .poll(now, &self.profiles, &mut self.pending, &mut *self.sender)
    }

    /// Creates fresh timing state for a player who joined the match.
    ///
    /// If the player is already tracked this only logs a warning. If the match
    /// is already running the player is pinged immediately instead of waiting
    /// for the next scheduled pass.
    pub fn add_player_session(&mut self, player: PlayerId) -> Result<(), TimeSyncError> {
        if self.closed {
            return Err(TimeSyncError::Closed);
        }
        if !player.is_valid_for(self.max_players) {
            return Err(InvalidRequestKind::PlayerSlotOutOfRange {
                player,
                max_players: self.max_players,
            }
            .into());
        }
        if self.profiles.contains(player) {
            warn!("Player {} already has a time sync session", player);
            return Ok(());
        }

        let now = self.clock.server_time_or_zero();
        self.profiles.insert(
            player,
            SyncProfile::with_sample_size(now, self.config.ping_sample_size),
        );
        debug!("Added time sync session for player {} at {}ms", player, now);

        if self.scheduler.is_running() {
            self.scheduler.send_immediate_ping(
                player,
                now,
                &self.profiles,
                &mut self.pending,
                &mut *self.sender,
            );
        }
        Ok(())
    }

    /// Drops the profile, ping ledger and action history of a player who left.
    ///
    /// Returns `false` if the player was not tracked.
    pub fn remove_player_session(&mut self, player: PlayerId) -> bool {
        let existed = self.profiles.remove(player).is_some();
        self.pending.remove_player(player);
        self.validator.remove_player(player);
        if existed {
            debug!("Removed time sync session for player {}", player);
        }
        existed
    }

    /// Applies a `PONG` from `player`.
    ///
    /// The echoed `original_server_time` must match a ping that was sent to
    /// this player and not answered yet. Anything else (a replay, a forged or
    /// expired stamp, a pong from a player who already left) is reported as a
    /// [`ViolationKind::ReplayDefense`] warning and discarded without touching
    /// any state. A matching pong whose client time is NaN or infinite still
    /// consumes its stamp but is discarded as [`ViolationKind::MalformedPong`],
    /// so it can neither set nor poison the drift baseline.
    pub fn handle_pong(
        &mut self,
        player: PlayerId,
        client_time: f64,
        original_server_time: f64,
    ) -> PongOutcome {
        if self.closed {
            trace!("Dropping PONG from player {} on a closed coordinator", player);
            return PongOutcome::Discarded;
        }
        if !self.pending.validate_and_consume_ping(player, original_server_time) {
            report_violation_to!(
                self.violation_observer,
                player,
                ViolationSeverity::Warning,
                ViolationKind::ReplayDefense,
                "player {} sent PONG with invalid serverTime {}",
                player,
                original_server_time
            );
            return PongOutcome::Discarded;
        }

        let now = self.clock.server_time_or_zero();
        let rtt = now - original_server_time;
        let offset = client_time - (original_server_time + rtt / 2.0);
        if !(client_time.is_finite() && rtt.is_finite() && offset.is_finite()) {
            report_violation_to!(
                self.violation_observer,
                player,
                ViolationSeverity::Warning,
                ViolationKind::MalformedPong,
                "player {} sent PONG with unusable clientTime {}",
                player,
                client_time
            );
            return PongOutcome::Discarded;
        }

        let Some(profile) = self.profiles.get_mut(player) else {
            report_violation_to!(
                self.violation_observer,
                player,
                ViolationSeverity::Error,
                ViolationKind::InternalError,
                "player {} had an outstanding ping but no sync profile",
                player
            );
            return PongOutcome::Discarded;
        };

        if !profile.update_from_pong(offset, rtt, client_time, now) {
            return PongOutcome::Discarded;
        }
        trace!(
            "PONG from player {}: rtt={}ms offset={}ms median={}ms",
            player,
            rtt,
            offset,
            profile.offset()
        );

        crate::debug_check_invariants!(self, "after handle_pong");
        PongOutcome::Applied { rtt, offset }
    }

    /// Checks whether an action `player` sent at `client_time` may be applied now.
    ///
    /// Returns the server time to apply it at, or the reason it must be rejected.
    /// A rejection is reported through the violation observer; the caller only
    /// has to refuse the action.
    pub fn assess_timing(&self, player: PlayerId, client_time: f64) -> TimingAssessment {
        let now = self.clock.server_time_or_zero();
        self.validator
            .assess_timing(player, client_time, now, self.profiles.get(player), now)
    }

    /// Server-time estimate for `client_time`, never earlier than the player's last committed action.
    #[must_use]
    pub fn estimate_server_time(&self, player: PlayerId, client_time: f64) -> f64 {
        let now = self.clock.server_time_or_zero();
        self.validator
            .estimate_server_time(player, client_time, self.profiles.get(player), now)
    }

    /// Commits an applied action and returns the server time it was committed at.
    ///
    /// The commit is stamped with the match clock, not with a conversion of
    /// `client_time`, and never earlier than the player's previous commit.
    /// Only call this after [`assess_timing`](Self::assess_timing) accepted the
    /// action and its effect has been applied. Actions from players without a
    /// session are not recorded.
    pub fn update_last_action_time(
        &mut self,
        player: PlayerId,
        action: impl Into<String>,
        client_time: f64,
    ) -> f64 {
        let server_time = self
            .validator
            .commit_time(player, self.clock.server_time_or_zero());
        if !self.profiles.contains(player) {
            warn!(
                "Not recording action from player {} without a time sync session",
                player
            );
            return server_time;
        }
        self.validator
            .update_last_action_time(player, action, client_time, server_time)
    }

    /// Latest round-trip time for `player`, or `0` if the player is not tracked.
    #[must_use]
    pub fn player_ping(&self, player: PlayerId) -> f64 {
        self.profiles.get(player).map_or(0.0, SyncProfile::rtt)
    }

    /// Milliseconds since [`start`](Self::start).
    pub fn server_time(&self) -> Result<f64, TimeSyncError> {
        self.clock.server_time()
    }

    /// Converts a client timestamp of `player` to server time.
    ///
    /// Identity for untracked players. Fails with [`TimeSyncError::NotStarted`]
    /// before [`start`](Self::start).
    pub fn client_to_server_time(&self, player: PlayerId, client_time: f64) -> Result<f64, TimeSyncError> {
        self.clock.server_time()?;
        Ok(self
            .profiles
            .get(player)
            .map_or(client_time, |profile| profile.client_to_server_time(client_time)))
    }

    /// Converts a server timestamp to `player`'s client clock.
    ///
    /// Identity for untracked players. Fails with [`TimeSyncError::NotStarted`]
    /// before [`start`](Self::start).
    pub fn server_to_client_time(&self, player: PlayerId, server_time: f64) -> Result<f64, TimeSyncError> {
        self.clock.server_time()?;
        Ok(self
            .profiles
            .get(player)
            .map_or(server_time, |profile| profile.server_to_client_time(server_time)))
    }

    /// Diagnostic snapshot of `player`'s timing state.
    #[must_use]
    pub fn sync_stats(&self, player: PlayerId) -> Option<SyncStats> {
        let profile = self.profiles.get(player)?;
        let now = self.clock.server_time_or_zero();
        let synced = profile.has_initial_sync();
        let stale = synced && profile.is_stale(now, self.config.max_ping_age);
        Some(SyncStats {
            player,
            offset: profile.offset(),
            rtt: profile.rtt(),
            initial_offset: profile.initial_offset(),
            samples: profile.samples().len(),
            pending_pings: self.pending.pending_count(player),
            action_history: self.validator.history_len(player),
            last_updated: profile.last_updated(),
            synced,
            stale,
            quality: SyncStats::classify(synced, stale, profile.rtt()),
        })
    }

    /// Replaces `player`'s profile with a fresh one and pings them immediately.
    ///
    /// The drift baseline is dropped and re-established by the next pong. The
    /// action history is kept, so the player still cannot go back in time. A
    /// host typically calls this after a
    /// [`DriftExceeded`](crate::RejectReason::DriftExceeded) rejection caused by
    /// a legitimate clock adjustment on the client.
    pub fn force_resync(&mut self, player: PlayerId) -> Result<(), TimeSyncError> {
        if self.closed {
            return Err(TimeSyncError::Closed);
        }
        let now = self.clock.server_time()?;
        let Some(profile) = self.profiles.get_mut(player) else {
            return Err(TimeSyncError::UnknownPlayer { player });
        };
        *profile = SyncProfile::with_sample_size(now, self.config.ping_sample_size);
        debug!("Forced resync for player {} at {}ms", player, now);

        self.scheduler.send_immediate_ping(
            player,
            now,
            &self.profiles,
            &mut self.pending,
            &mut *self.sender,
        );
        Ok(())
    }

    /// Stops pinging and forgets every player. Safe to call more than once.
    pub fn close(&mut self) {
        self.scheduler.stop();
        self.profiles.clear();
        self.pending.clear();
        self.validator.clear();
        if !self.closed {
            debug!("Time coordinator closed");
        }
        self.closed = true;
    }

    /// Number of tracked players.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.profiles.len()
    }

    /// Returns `true` if `player` has a session.
    #[must_use]
    pub fn contains_player(&self, player: PlayerId) -> bool {
        self.profiles.contains(player)
    }

    /// Ids of all tracked players, in slot order.
    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.profiles.players()
    }

    /// Returns `true` once [`start`](Self::start) has run.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.clock.is_started()
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Match time of the next scheduled ping pass, if the schedule is running.
    #[must_use]
    pub fn next_ping_deadline(&self) -> Option<f64> {
        self.scheduler.next_deadline()
    }

    /// Number of player slots in this match.
    #[must_use]
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// The policy this coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &TimeSyncConfig {
        &self.config
    }

    /// The observer rejections and invalid pongs are reported to, if one was set.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }
}

impl InvariantChecker for TimeCoordinator {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (player, profile) in self.profiles.iter() {
            if !player.is_valid_for(self.max_players) {
                return Err(InvariantViolation::new(
                    "TimeCoordinator",
                    "profile stored outside the player slots",
                )
                .with_details(format!("player={}, max_players={}", player, self.max_players)));
            }
            profile.check_invariants()?;
        }
        self.pending.check_invariants()?;
        self.validator.check_invariants()
    }
}
