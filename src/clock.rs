//! Monotonic time sources and the per-match server clock.
//!
//! All timing in this crate is expressed as `f64` milliseconds read from a
//! [`Clock`]. The production clock is backed by `web_time::Instant`, so it is
//! monotonic and unaffected by wall-clock adjustments on the host. Tests and
//! simulations use [`ManualClock`], which only moves when told to.

use std::sync::Arc;

use parking_lot::Mutex;
use web_time::Instant;

use crate::TimeSyncError;

/// A monotonic millisecond time source.
///
/// Readings must never decrease. The absolute value is meaningless; only
/// differences between readings are used.
#[cfg(feature = "sync-send")]
pub trait Clock: Send + Sync {
    /// Returns the current reading in milliseconds.
    fn now_ms(&self) -> f64;
}

/// A monotonic millisecond time source.
///
/// Readings must never decrease. The absolute value is meaningless; only
/// differences between readings are used.
#[cfg(not(feature = "sync-send"))]
pub trait Clock {
    /// Returns the current reading in milliseconds.
    fn now_ms(&self) -> f64;
}

/// Production clock: high-resolution milliseconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose zero is the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that only moves when advanced. Clones share the same reading.
///
/// # Example
///
/// ```
/// use duel_timesync::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
///
/// handle.advance(250.0);
/// assert_eq!(clock.now_ms(), 250.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Creates a manual clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    /// Creates a manual clock with an arbitrary initial reading.
    #[must_use]
    pub fn starting_at(now_ms: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now_ms)),
        }
    }

    /// Moves the clock forward. Negative or non-finite steps are ignored so the clock stays monotonic.
    pub fn advance(&self, delta_ms: f64) {
        if delta_ms.is_finite() && delta_ms > 0.0 {
            *self.now.lock() += delta_ms;
        }
    }

    /// Jumps to `now_ms` if that is not in the past.
    pub fn set(&self, now_ms: f64) {
        let mut now = self.now.lock();
        if now_ms.is_finite() && now_ms > *now {
            *now = now_ms;
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}

/// The authoritative clock of one match.
///
/// Reads zero at [`start`](Self::start) and counts up from there. Before the
/// match is started there is no server time at all: [`server_time`](Self::server_time)
/// fails with [`TimeSyncError::NotStarted`] instead of inventing a value.
pub struct MatchClock {
    source: Box<dyn Clock>,
    start_ms: Option<f64>,
}

impl MatchClock {
    /// Wraps a time source. The match is not started yet.
    #[must_use]
    pub fn new(source: Box<dyn Clock>) -> Self {
        Self {
            source,
            start_ms: None,
        }
    }

    /// Records the start of the match. Returns `false` if it was already started.
    pub fn start(&mut self) -> bool {
        if self.start_ms.is_some() {
            return false;
        }
        self.start_ms = Some(self.source.now_ms());
        true
    }

    /// Returns `true` once [`start`](Self::start) has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.start_ms.is_some()
    }

    /// Milliseconds since the match started.
    pub fn server_time(&self) -> Result<f64, TimeSyncError> {
        let start = self.start_ms.ok_or(TimeSyncError::NotStarted)?;
        Ok((self.source.now_ms() - start).max(0.0))
    }

    /// Like [`server_time`](Self::server_time), but reads zero before the start.
    ///
    /// Used for seeding fresh profiles and for validation bookkeeping, where
    /// "not started" and "time zero" mean the same thing.
    #[must_use]
    pub fn server_time_or_zero(&self) -> f64 {
        self.server_time().unwrap_or(0.0)
    }
}

impl std::fmt::Debug for MatchClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchClock")
            .field("start_ms", &self.start_ms)
            .field("now_ms", &self.source.now_ms())
            .finish()
    }
}
