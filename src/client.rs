//! The peer-side half of the ping/pong exchange.
//!
//! Clients answer every ping immediately with their own clock reading and
//! keep a rough, unfiltered estimate of the server clock for display
//! purposes (cooldown timers, latency badges). None of this is trusted by the
//! server; it only has to be good enough to look right on screen.

use tracing::trace;

use crate::clock::{Clock, MonotonicClock};
use crate::messages::{Ping, Pong};

/// Client-side view of the match clock.
pub struct ClientTimeCoordinator {
    clock: Box<dyn Clock>,
    sync_offset: f64,
    rtt: f64,
}

impl std::fmt::Debug for ClientTimeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTimeCoordinator")
            .field("now_ms", &self.clock.now_ms())
            .field("sync_offset", &self.sync_offset)
            .field("rtt", &self.rtt)
            .finish()
    }
}

impl Default for ClientTimeCoordinator {
    fn default() -> Self {
        Self::new(MonotonicClock::new())
    }
}

impl ClientTimeCoordinator {
    /// Creates an unsynced client reading time from `clock`.
    #[must_use]
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            sync_offset: 0.0,
            rtt: 0.0,
        }
    }

    /// Answers `ping` through `send_pong`, then refreshes the local estimate.
    ///
    /// The pong is sent before any bookkeeping so the measured round trip is as
    /// short as possible. Returns the pong that was sent.
    ///
    /// ```
    /// use duel_timesync::{ClientTimeCoordinator, ManualClock, Ping};
    ///
    /// let clock = ManualClock::starting_at(5_000.0);
    /// let mut client = ClientTimeCoordinator::new(clock);
    ///
    /// let mut outbox = Vec::new();
    /// client.handle_ping(Ping { server_time: 2_000.0, client_ping: 40.0 }, |pong| outbox.push(pong));
    ///
    /// assert_eq!(outbox[0].server_time, 2_000.0);
    /// assert_eq!(outbox[0].client_time, 5_000.0);
    /// assert_eq!(client.sync_offset(), 3_000.0);
    /// ```
    pub fn handle_ping(&mut self, ping: Ping, send_pong: impl FnOnce(Pong)) -> Pong {
        let now = self.clock.now_ms();
        let pong = Pong {
            client_time: now,
            server_time: ping.server_time,
        };
        send_pong(pong);
        self.update_sync(now - ping.server_time, ping.client_ping);
        pong
    }

    /// Overwrites the local offset and RTT estimate.
    pub fn update_sync(&mut self, offset: f64, rtt: f64) {
        trace!("Client sync updated: offset={}ms rtt={}ms", offset, rtt);
        self.sync_offset = offset;
        self.rtt = rtt;
    }

    /// Rough server time corresponding to a local `client_time`.
    #[must_use]
    pub fn estimate_server_time(&self, client_time: f64) -> f64 {
        client_time - self.sync_offset + self.rtt / 2.0
    }

    /// Milliseconds until the server-time deadline `ends_at`, never negative.
    ///
    /// Used to drive cooldown indicators from server-issued deadlines.
    #[must_use]
    pub fn remaining_cooldown(&self, ends_at: f64, client_now: f64) -> f64 {
        (ends_at - self.estimate_server_time(client_now)).max(0.0)
    }

    /// Forgets the current estimate.
    pub fn reset(&mut self) {
        self.sync_offset = 0.0;
        self.rtt = 0.0;
    }

    /// Last offset observed, `client - server`, in milliseconds.
    #[must_use]
    pub fn sync_offset(&self) -> f64 {
        self.sync_offset
    }

    /// Last RTT reported by the server.
    #[must_use]
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    /// Current local clock reading.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.clock.now_ms()
    }
}
