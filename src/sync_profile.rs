//! Per-player clock offset and round-trip estimate.

use std::collections::VecDeque;

use web_time::Duration;

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::PING_SAMPLE_SIZE;

/// What the server currently believes about one player's clock.
///
/// The offset is `client_time - server_time` in milliseconds (positive when
/// the client clock reads ahead) and is the median of the last few raw
/// observations, so a single congested exchange cannot drag it around. RTT is
/// deliberately unfiltered: a sudden RTT jump is information, not noise.
///
/// The first successful pong also fixes a baseline (`initial_*`). Later
/// observations are compared against it to measure how far the client's
/// elapsed time has diverged from the server's, which is how a sped-up client
/// clock is caught even when each individual sample looks plausible.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProfile {
    offset: f64,
    rtt: f64,
    offset_samples: VecDeque<f64>,
    sample_size: usize,
    initial_offset: f64,
    initial_client_time: f64,
    initial_server_time: f64,
    last_updated: f64,
}

impl SyncProfile {
    /// Creates an unsynced profile stamped at `server_time`.
    #[must_use]
    pub fn new(server_time: f64) -> Self {
        Self::with_sample_size(server_time, PING_SAMPLE_SIZE)
    }

    /// Creates an unsynced profile with a custom median window.
    #[must_use]
    pub fn with_sample_size(server_time: f64, sample_size: usize) -> Self {
        let sample_size = sample_size.max(1);
        Self {
            offset: 0.0,
            rtt: 0.0,
            offset_samples: VecDeque::with_capacity(sample_size),
            sample_size,
            initial_offset: 0.0,
            initial_client_time: 0.0,
            initial_server_time: 0.0,
            last_updated: server_time,
        }
    }

    /// Feeds one ping/pong measurement into the profile.
    ///
    /// A measurement with any non-finite value is ignored and `false` is
    /// returned; the profile is left exactly as it was.
    pub fn update_from_pong(&mut self, offset: f64, rtt: f64, client_time: f64, server_time: f64) -> bool {
        if ![offset, rtt, client_time, server_time].iter().all(|v| v.is_finite()) {
            return false;
        }
        if !self.has_initial_sync() {
            self.initial_offset = offset;
            self.initial_client_time = client_time;
            self.initial_server_time = server_time;
        }

        self.offset_samples.push_back(offset);
        while self.offset_samples.len() > self.sample_size {
            self.offset_samples.pop_front();
        }
        self.offset = median(&self.offset_samples);
        self.rtt = rtt;
        self.last_updated = server_time;

        crate::debug_check_invariants!(self, "after update_from_pong");
        true
    }

    /// Converts a client timestamp to server time.
    #[must_use]
    pub fn client_to_server_time(&self, client_time: f64) -> f64 {
        client_time - self.offset
    }

    /// Converts a server timestamp to client time.
    #[must_use]
    pub fn server_to_client_time(&self, server_time: f64) -> f64 {
        server_time + self.offset
    }

    /// How much more time has elapsed on the client than on the server since the first sync.
    ///
    /// Zero before the first sync. Positive means the client clock runs fast.
    ///
    /// ```
    /// use duel_timesync::sync_profile::SyncProfile;
    ///
    /// let mut profile = SyncProfile::new(0.0);
    /// profile.update_from_pong(-50.0, 10.0, 1000.0, 1050.0);
    ///
    /// assert_eq!(profile.calculate_cumulative_drift(1200.0, 1200.0), 50.0);
    /// ```
    #[must_use]
    pub fn calculate_cumulative_drift(&self, current_client_time: f64, current_server_time: f64) -> f64 {
        if !self.has_initial_sync() {
            return 0.0;
        }
        let client_elapsed = current_client_time - self.initial_client_time;
        let server_elapsed = current_server_time - self.initial_server_time;
        client_elapsed - server_elapsed
    }

    /// Returns `true` once a pong has been applied.
    #[must_use]
    pub fn has_initial_sync(&self) -> bool {
        !self.offset_samples.is_empty()
    }

    /// Most recent raw round-trip time.
    #[must_use]
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    /// Current median offset.
    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Offset captured on the first sync.
    #[must_use]
    pub fn initial_offset(&self) -> f64 {
        self.initial_offset
    }

    /// Raw offsets currently in the median window, oldest first.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.offset_samples.iter().copied()
    }

    /// Server time of the last update (or of creation).
    #[must_use]
    pub fn last_updated(&self) -> f64 {
        self.last_updated
    }

    /// `true` if the profile was never synced or has not been refreshed within `max_age`.
    #[must_use]
    pub fn is_stale(&self, server_now: f64, max_age: Duration) -> bool {
        !self.has_initial_sync() || server_now - self.last_updated > max_age.as_secs_f64() * 1000.0
    }
}

/// Median of a non-empty window; the mean of the two middle values for even lengths.
fn median(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl InvariantChecker for SyncProfile {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.offset_samples.len() > self.sample_size {
            return Err(
                InvariantViolation::new("SyncProfile", "offset window exceeds sample size")
                    .with_details(format!(
                        "len={}, sample_size={}",
                        self.offset_samples.len(),
                        self.sample_size
                    )),
            );
        }
        if !self.offset_samples.is_empty() {
            let expected = median(&self.offset_samples);
            if (expected - self.offset).abs() > f64::EPSILON {
                return Err(
                    InvariantViolation::new("SyncProfile", "offset is not the window median")
                        .with_details(format!("offset={}, median={}", self.offset, expected)),
                );
            }
        }
        Ok(())
    }
}
