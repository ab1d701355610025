//! Timing checks applied to every gameplay action before it touches game state.
//!
//! The validator keeps a short, time-ordered history of *committed* actions
//! per player. An incoming action is checked against that history in a fixed
//! order:
//!
//! 1. the player must have a sync profile,
//! 2. its client timestamp must be strictly later than the last committed one,
//! 3. it must not be the next action of an already full burst window,
//! 4. once the player is synced, the client's elapsed time since the first
//!    sync must agree with the server's to within the drift tolerance.
//!
//! Passing all four yields an accepted server-time estimate. Nothing is
//! recorded until the host calls [`ActionValidator::update_last_action_time`]
//! after it has actually applied the action, so rejected or no-op actions
//! never count against the player's burst budget or move the monotonic floor.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::TimeSyncConfig;
use crate::player_table::PlayerTable;
use crate::sync_profile::SyncProfile;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, PlayerId};

/// Why an action's timing was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The player has no session in this match (not yet joined, or already left).
    ///
    /// Treat as "not ready yet" rather than as cheating.
    NoSyncProfile,
    /// The client timestamp does not advance past the last committed action.
    MonotonicViolation,
    /// Too many actions inside the rate-limit window.
    RateLimit,
    /// The client clock has drifted too far from the server clock since the first sync.
    DriftExceeded,
}

impl RejectReason {
    /// The negative sentinel this reason maps to in the numeric action protocol.
    #[must_use]
    pub const fn code(self) -> f64 {
        match self {
            Self::NoSyncProfile => -1.0,
            Self::MonotonicViolation => -2.0,
            Self::RateLimit => -3.0,
            Self::DriftExceeded => -4.0,
        }
    }

    /// Label suitable for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSyncProfile => "no_sync_profile",
            Self::MonotonicViolation => "monotonic_violation",
            Self::RateLimit => "rate_limit",
            Self::DriftExceeded => "drift_exceeded",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ActionValidator::assess_timing`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "a rejected action must not be applied"]
pub enum TimingAssessment {
    /// The action may be applied at this server time (always `>= 0`).
    Accepted(f64),
    /// The action must be rejected.
    Rejected(RejectReason),
}

impl TimingAssessment {
    /// Returns `true` for [`TimingAssessment::Accepted`].
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The accepted server time, if any.
    #[must_use]
    pub const fn server_time(&self) -> Option<f64> {
        match self {
            Self::Accepted(server_time) => Some(*server_time),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection reason, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }

    /// Flattens to a single number: the server time when accepted, a negative code otherwise.
    ///
    /// ```
    /// use duel_timesync::{RejectReason, TimingAssessment};
    ///
    /// assert_eq!(TimingAssessment::Accepted(1500.0).code(), 1500.0);
    /// assert_eq!(TimingAssessment::Rejected(RejectReason::RateLimit).code(), -3.0);
    /// ```
    #[must_use]
    pub const fn code(&self) -> f64 {
        match self {
            Self::Accepted(server_time) => *server_time,
            Self::Rejected(reason) => reason.code(),
        }
    }
}

/// One committed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    /// Host-defined action name, e.g. `"set_cell"`.
    pub action: String,
    /// Client timestamp the action was sent with.
    pub client_time: f64,
    /// Server time the action was committed at.
    pub server_time: f64,
}

/// Per-player action history and the timing checks that run against it.
pub struct ActionValidator {
    histories: PlayerTable<VecDeque<ActionRecord>>,
    max_history: usize,
    rate_limit_actions: usize,
    rate_limit_window_ms: f64,
    max_cumulative_drift_ms: f64,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for ActionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            histories,
            max_history,
            rate_limit_actions,
            rate_limit_window_ms,
            max_cumulative_drift_ms,
            violation_observer,
        } = self;

        f.debug_struct("ActionValidator")
            .field("histories", histories)
            .field("max_history", max_history)
            .field("rate_limit_actions", rate_limit_actions)
            .field("rate_limit_window_ms", rate_limit_window_ms)
            .field("max_cumulative_drift_ms", max_cumulative_drift_ms)
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl Default for ActionValidator {
    fn default() -> Self {
        Self::new(&TimeSyncConfig::default(), None)
    }
}

impl ActionValidator {
    /// Creates a validator using the thresholds from `config`.
    #[must_use]
    pub fn new(config: &TimeSyncConfig, violation_observer: Option<Arc<dyn ViolationObserver>>) -> Self {
        Self {
            histories: PlayerTable::new(),
            max_history: config.max_action_history.max(1),
            rate_limit_actions: config.rate_limit_actions.max(1),
            rate_limit_window_ms: config.rate_limit_window_ms(),
            max_cumulative_drift_ms: config.max_cumulative_drift_ms,
            violation_observer,
        }
    }

    /// Runs the four timing checks for an action `player` sent at `client_time`.
    ///
    /// `profile` is the player's sync profile (`None` if the player is unknown)
    /// and `fallback_server_time` is used for the estimate when there is no
    /// profile to convert through.
    pub fn assess_timing(
        &self,
        player: PlayerId,
        client_time: f64,
        current_server_time: f64,
        profile: Option<&SyncProfile>,
        fallback_server_time: f64,
    ) -> TimingAssessment {
        let Some(sync_profile) = profile else {
            return self.reject(player, RejectReason::NoSyncProfile, "player has no sync profile");
        };

        let history = self.histories.get(player);

        if !client_time.is_finite() {
            return self.reject(
                player,
                RejectReason::MonotonicViolation,
                format!("client time {} cannot be ordered", client_time),
            );
        }
        if let Some(last) = history.and_then(VecDeque::back) {
            if client_time <= last.client_time {
                return self.reject(
                    player,
                    RejectReason::MonotonicViolation,
                    format!(
                        "client time {} does not advance past last committed {}",
                        client_time, last.client_time
                    ),
                );
            }
        }

        if let Some(history) = history {
            let window_start = current_server_time - self.rate_limit_window_ms;
            let recent = history
                .iter()
                .rev()
                .take(self.rate_limit_actions)
                .filter(|record| record.server_time >= window_start)
                .count();
            if recent >= self.rate_limit_actions {
                return self.reject(
                    player,
                    RejectReason::RateLimit,
                    format!(
                        "{} actions within {}ms",
                        recent, self.rate_limit_window_ms
                    ),
                );
            }
        }

        if sync_profile.has_initial_sync() {
            let drift = sync_profile.calculate_cumulative_drift(client_time, current_server_time);
            if drift.abs() > self.max_cumulative_drift_ms {
                return self.reject(
                    player,
                    RejectReason::DriftExceeded,
                    format!(
                        "cumulative drift {:.1}ms exceeds {}ms",
                        drift, self.max_cumulative_drift_ms
                    ),
                );
            }
        }

        TimingAssessment::Accepted(self.estimate_server_time(
            player,
            client_time,
            Some(sync_profile),
            fallback_server_time,
        ))
    }

    /// Converts `client_time` to server time, never earlier than the last committed action.
    ///
    /// Falls back to `fallback_server_time` when there is no profile. The result
    /// is also never negative.
    #[must_use]
    pub fn estimate_server_time(
        &self,
        player: PlayerId,
        client_time: f64,
        profile: Option<&SyncProfile>,
        fallback_server_time: f64,
    ) -> f64 {
        let converted =
            profile.map_or(fallback_server_time, |p| p.client_to_server_time(client_time));
        let floor = self
            .last_action(player)
            .map_or(0.0, |last| last.server_time.max(0.0));
        if converted.is_nan() {
            return floor;
        }
        converted.max(floor)
    }

    /// Server time to commit `player`'s next action at when the match clock reads `now`.
    ///
    /// Never earlier than the previous commit and never negative, so the
    /// monotonic floor and the burst window only ever move forward.
    #[must_use]
    pub fn commit_time(&self, player: PlayerId, now: f64) -> f64 {
        let floor = self
            .last_action(player)
            .map_or(0.0, |last| last.server_time.max(0.0));
        if now.is_nan() {
            return floor;
        }
        now.max(floor)
    }

    /// Commits an applied action to `player`'s history and returns `server_time` unchanged.
    ///
    /// Call this only after the action passed [`assess_timing`](Self::assess_timing)
    /// and its game-state change has been applied.
    pub fn update_last_action_time(
        &mut self,
        player: PlayerId,
        action: impl Into<String>,
        client_time: f64,
        server_time: f64,
    ) -> f64 {
        let max_history = self.max_history;
        let history = self
            .histories
            .get_or_insert_with(player, || VecDeque::with_capacity(max_history));
        history.push_back(ActionRecord {
            action: action.into(),
            client_time,
            server_time,
        });
        while history.len() > max_history {
            history.pop_front();
        }

        crate::debug_check_invariants!(self, "after update_last_action_time");
        server_time
    }

    /// The most recently committed action for `player`.
    #[must_use]
    pub fn last_action(&self, player: PlayerId) -> Option<&ActionRecord> {
        self.histories.get(player).and_then(VecDeque::back)
    }

    /// Number of committed actions remembered for `player`.
    #[must_use]
    pub fn history_len(&self, player: PlayerId) -> usize {
        self.histories.get(player).map_or(0, VecDeque::len)
    }

    /// Committed actions for `player`, oldest first.
    pub fn history(&self, player: PlayerId) -> impl Iterator<Item = &ActionRecord> + '_ {
        self.histories.get(player).into_iter().flatten()
    }

    /// Forgets `player`'s history.
    pub fn remove_player(&mut self, player: PlayerId) {
        self.histories.remove(player);
    }

    /// Forgets every history.
    pub fn clear(&mut self) {
        self.histories.clear();
    }

    fn reject(
        &self,
        player: PlayerId,
        reason: RejectReason,
        detail: impl std::fmt::Display,
    ) -> TimingAssessment {
        report_violation_to!(
            self.violation_observer,
            player,
            ViolationSeverity::Warning,
            ViolationKind::ActionTiming,
            "action from player {} rejected ({}): {}",
            player,
            reason,
            detail
        );
        TimingAssessment::Rejected(reason)
    }
}

impl InvariantChecker for ActionValidator {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (player, history) in self.histories.iter() {
            if history.len() > self.max_history {
                return Err(
                    InvariantViolation::new("ActionValidator", "history exceeds capacity")
                        .with_details(format!("player={}, len={}", player, history.len())),
                );
            }
            let ordered = history
                .iter()
                .zip(history.iter().skip(1))
                .all(|(a, b)| a.client_time < b.client_time);
            if !ordered {
                return Err(InvariantViolation::new(
                    "ActionValidator",
                    "committed client times are not strictly increasing",
                )
                .with_details(format!("player={}", player)));
            }
        }
        Ok(())
    }
}
