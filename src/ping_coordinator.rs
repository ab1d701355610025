//! Ping scheduling.
//!
//! The scheduler is poll-driven: it owns a deadline on the match clock and
//! runs a ping pass whenever [`PingCoordinator::poll`] is called at or after
//! that deadline. Missed beats are skipped rather than replayed, so a host
//! that stalls for several intervals gets one pass, not a burst.

use tracing::{debug, trace};

use crate::config::TimeSyncConfig;
use crate::messages::{Ping, SyncMessage};
use crate::pending_pings::PendingPingStore;
use crate::player_table::PlayerTable;
use crate::sync_profile::SyncProfile;
use crate::{PeerSender, PlayerId, MIN_PING_INTERVAL_MS, PING_INTERVAL_MS};

/// Decides when each player gets pinged.
///
/// A player is skipped in a pass when the circuit breaker is open (too many
/// pings outstanding) or when its newest outstanding ping is younger than the
/// minimum interval.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone, PartialEq)]
pub struct PingCoordinator {
    interval_ms: f64,
    min_interval_ms: f64,
    next_deadline: Option<f64>,
}

impl Default for PingCoordinator {
    fn default() -> Self {
        Self::new(PING_INTERVAL_MS, MIN_PING_INTERVAL_MS)
    }
}

impl PingCoordinator {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(interval_ms: f64, min_interval_ms: f64) -> Self {
        Self {
            interval_ms,
            min_interval_ms,
            next_deadline: None,
        }
    }

    /// Creates a stopped scheduler with the intervals from `config`.
    #[must_use]
    pub fn from_config(config: &TimeSyncConfig) -> Self {
        Self::new(config.ping_interval_ms(), config.min_ping_interval_ms())
    }

    /// Starts the schedule at `now` with an immediate pass.
    ///
    /// Does nothing and returns `0` if the schedule is already running.
    /// Otherwise returns the number of pings sent.
    pub fn start_ping_service(
        &mut self,
        now: f64,
        profiles: &PlayerTable<SyncProfile>,
        pending: &mut PendingPingStore,
        sender: &mut dyn PeerSender,
    ) -> usize {
        if self.is_running() {
            return 0;
        }
        debug!("Starting ping service at {}ms, interval {}ms", now, self.interval_ms);
        self.next_deadline = Some(now + self.interval_ms);
        self.ping_pass(now, profiles, pending, sender)
    }

    /// Runs a ping pass if the deadline has been reached. Returns the number of pings sent.
    pub fn poll(
        &mut self,
        now: f64,
        profiles: &PlayerTable<SyncProfile>,
        pending: &mut PendingPingStore,
        sender: &mut dyn PeerSender,
    ) -> usize {
        let Some(deadline) = self.next_deadline else {
            return 0;
        };
        if now < deadline {
            return 0;
        }

        let missed = ((now - deadline) / self.interval_ms).floor();
        if missed >= 1.0 {
            debug!("Ping pass {}ms late, skipping {} beat(s)", now - deadline, missed);
        }
        self.next_deadline = Some(deadline + (missed + 1.0) * self.interval_ms);
        self.ping_pass(now, profiles, pending, sender)
    }

    /// Pings `player` right now, ignoring the circuit breaker and the minimum interval.
    ///
    /// Returns `false` if the player has no profile.
    pub fn send_immediate_ping(
        &mut self,
        player: PlayerId,
        now: f64,
        profiles: &PlayerTable<SyncProfile>,
        pending: &mut PendingPingStore,
        sender: &mut dyn PeerSender,
    ) -> bool {
        match profiles.get(player) {
            Some(profile) => {
                send_ping(player, profile, now, pending, sender);
                true
            },
            None => false,
        }
    }

    /// Stops the schedule. A later start begins a fresh one.
    pub fn stop(&mut self) {
        if self.next_deadline.take().is_some() {
            debug!("Ping service stopped");
        }
    }

    /// Returns `true` between start and stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.next_deadline.is_some()
    }

    /// Match time of the next scheduled pass, if running.
    #[must_use]
    pub fn next_deadline(&self) -> Option<f64> {
        self.next_deadline
    }

    fn ping_pass(
        &self,
        now: f64,
        profiles: &PlayerTable<SyncProfile>,
        pending: &mut PendingPingStore,
        sender: &mut dyn PeerSender,
    ) -> usize {
        let mut sent = 0;
        for (player, profile) in profiles.iter() {
            if !pending.can_receive_ping(player) {
                debug!(
                    "Circuit breaker open for player {}: {} pings outstanding",
                    player,
                    pending.pending_count(player)
                );
                continue;
            }
            if let Some(last) = pending.last_ping_time(player) {
                if now - last < self.min_interval_ms {
                    debug!(
                        "Skipping ping to player {}: last ping {}ms ago",
                        player,
                        now - last
                    );
                    continue;
                }
            }
            send_ping(player, profile, now, pending, sender);
            sent += 1;
        }
        sent
    }
}

fn send_ping(
    player: PlayerId,
    profile: &SyncProfile,
    now: f64,
    pending: &mut PendingPingStore,
    sender: &mut dyn PeerSender,
) {
    pending.add_pending_ping(player, now);
    trace!("PING player {} at {}ms", player, now);
    sender.forward(
        player,
        SyncMessage::Ping(Ping {
            server_time: now,
            client_ping: profile.rtt(),
        }),
    );
}
