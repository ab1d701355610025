//! Timing policy for a match.
//!
//! [`TimeSyncConfig::default()`] is the production policy and is what every
//! match should run with. The other presets exist for load tests and tooling
//! that want to exercise the same code paths with different thresholds.
//!
//! | Field | Default |
//! |-------|---------|
//! | `ping_interval` | 2000 ms |
//! | `min_ping_interval` | 500 ms |
//! | `max_ping_age` | 10 000 ms |
//! | `max_pending_pings` | 10 |
//! | `ping_sample_size` | 5 |
//! | `max_action_history` | 30 |
//! | `max_cumulative_drift_ms` | 50 |
//! | `rate_limit_actions` / `rate_limit_window` | 5 per 500 ms |

use web_time::Duration;

use crate::{
    TimeSyncError, MAX_ACTION_HISTORY_COUNT, MAX_CUMULATIVE_DRIFT_MS, MAX_PENDING_PINGS,
    MAX_PING_AGE_MS, MIN_PING_INTERVAL_MS, PING_INTERVAL_MS, PING_SAMPLE_SIZE,
    RATE_LIMIT_ACTIONS, RATE_LIMIT_WINDOW_MS,
};

/// Thresholds used by the ping scheduler and the action validator.
///
/// # Forward Compatibility
///
/// New fields may be added. Construct with `..TimeSyncConfig::default()`.
///
/// # Example
///
/// ```
/// use duel_timesync::TimeSyncConfig;
/// use web_time::Duration;
///
/// let soak_test = TimeSyncConfig {
///     ping_interval: Duration::from_millis(250),
///     min_ping_interval: Duration::from_millis(100),
///     ..TimeSyncConfig::default()
/// };
/// assert!(soak_test.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "TimeSyncConfig has no effect unless passed to TimeCoordinatorBuilder::with_config()"]
pub struct TimeSyncConfig {
    /// Time between scheduled ping passes.
    ///
    /// Default: 2000ms
    pub ping_interval: Duration,

    /// A player whose newest outstanding ping is younger than this is skipped.
    ///
    /// Default: 500ms
    pub min_ping_interval: Duration,

    /// Outstanding pings older than this are forgotten.
    ///
    /// Default: 10s
    pub max_ping_age: Duration,

    /// Outstanding pings per player before the circuit breaker stops pinging them.
    ///
    /// Default: 10
    pub max_pending_pings: usize,

    /// Size of the median window for offset samples.
    ///
    /// Default: 5
    pub ping_sample_size: usize,

    /// Committed actions remembered per player.
    ///
    /// Default: 30
    pub max_action_history: usize,

    /// Largest tolerated cumulative drift in milliseconds.
    ///
    /// Default: 50
    pub max_cumulative_drift_ms: f64,

    /// Actions allowed within one `rate_limit_window`.
    ///
    /// Default: 5
    pub rate_limit_actions: usize,

    /// Length of the rate-limit window.
    ///
    /// Default: 500ms
    pub rate_limit_window: Duration,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            ping_interval: millis(PING_INTERVAL_MS),
            min_ping_interval: millis(MIN_PING_INTERVAL_MS),
            max_ping_age: millis(MAX_PING_AGE_MS),
            max_pending_pings: MAX_PENDING_PINGS,
            ping_sample_size: PING_SAMPLE_SIZE,
            max_action_history: MAX_ACTION_HISTORY_COUNT,
            max_cumulative_drift_ms: MAX_CUMULATIVE_DRIFT_MS,
            rate_limit_actions: RATE_LIMIT_ACTIONS,
            rate_limit_window: millis(RATE_LIMIT_WINDOW_MS),
        }
    }
}

impl TimeSyncConfig {
    /// Creates a new `TimeSyncConfig` with the production policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighter thresholds for tournament review tooling.
    ///
    /// Halves the drift tolerance and the burst allowance.
    pub fn strict() -> Self {
        Self {
            max_cumulative_drift_ms: 25.0,
            rate_limit_actions: 3,
            ..Self::default()
        }
    }

    /// Looser thresholds for local development over flaky connections.
    pub fn lenient() -> Self {
        Self {
            max_cumulative_drift_ms: 200.0,
            rate_limit_actions: 10,
            max_pending_pings: 20,
            max_ping_age: Duration::from_secs(20),
            ..Self::default()
        }
    }

    /// `ping_interval` in milliseconds.
    #[must_use]
    pub fn ping_interval_ms(&self) -> f64 {
        as_millis(self.ping_interval)
    }

    /// `min_ping_interval` in milliseconds.
    #[must_use]
    pub fn min_ping_interval_ms(&self) -> f64 {
        as_millis(self.min_ping_interval)
    }

    /// `max_ping_age` in milliseconds.
    #[must_use]
    pub fn max_ping_age_ms(&self) -> f64 {
        as_millis(self.max_ping_age)
    }

    /// `rate_limit_window` in milliseconds.
    #[must_use]
    pub fn rate_limit_window_ms(&self) -> f64 {
        as_millis(self.rate_limit_window)
    }

    /// Checks that the thresholds are usable together.
    pub fn validate(&self) -> Result<(), TimeSyncError> {
        if self.ping_interval.is_zero() {
            return Err(invalid("ping_interval", "must be non-zero"));
        }
        if self.min_ping_interval > self.ping_interval {
            return Err(invalid(
                "min_ping_interval",
                format!(
                    "{:?} exceeds ping_interval {:?}; scheduled pings would always be skipped",
                    self.min_ping_interval, self.ping_interval
                ),
            ));
        }
        if self.max_ping_age < self.ping_interval {
            return Err(invalid(
                "max_ping_age",
                "must be at least ping_interval or pings expire before the next pass",
            ));
        }
        if self.max_pending_pings == 0 {
            return Err(invalid("max_pending_pings", "must be at least 1"));
        }
        if self.ping_sample_size == 0 {
            return Err(invalid("ping_sample_size", "must be at least 1"));
        }
        if self.max_action_history == 0 {
            return Err(invalid("max_action_history", "must be at least 1"));
        }
        if !self.max_cumulative_drift_ms.is_finite() || self.max_cumulative_drift_ms < 0.0 {
            return Err(invalid(
                "max_cumulative_drift_ms",
                format!("{} is not a finite, non-negative tolerance", self.max_cumulative_drift_ms),
            ));
        }
        if self.rate_limit_actions == 0 {
            return Err(invalid("rate_limit_actions", "must be at least 1"));
        }
        if self.rate_limit_actions > self.max_action_history {
            return Err(invalid(
                "rate_limit_actions",
                format!(
                    "{} exceeds max_action_history {}; the window could never fill",
                    self.rate_limit_actions, self.max_action_history
                ),
            ));
        }
        if self.rate_limit_window.is_zero() {
            return Err(invalid("rate_limit_window", "must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> TimeSyncError {
    TimeSyncError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_secs_f64(ms / 1000.0)
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
