//! Host-side stand-ins: a recording transport and a scripted client.

use std::sync::Arc;

use duel_timesync::{
    ClientTimeCoordinator, ManualClock, PeerSender, Ping, PlayerId, Pong, PongOutcome, SyncMessage,
    TimeCoordinator,
};
use parking_lot::Mutex;

/// Transport that records every forwarded message. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<(PlayerId, SyncMessage)>>>,
}

impl PeerSender for RecordingSender {
    fn forward(&mut self, player: PlayerId, message: SyncMessage) {
        self.sent.lock().push((player, message));
    }
}

#[allow(dead_code)]
impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ping sent so far, in send order.
    pub fn pings(&self) -> Vec<(PlayerId, Ping)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(player, message)| match message {
                SyncMessage::Ping(ping) => Some((*player, *ping)),
                SyncMessage::Pong(_) => None,
            })
            .collect()
    }

    /// Pings sent to `player`, in send order.
    pub fn pings_to(&self, player: PlayerId) -> Vec<Ping> {
        self.pings()
            .into_iter()
            .filter(|(to, _)| *to == player)
            .map(|(_, ping)| ping)
            .collect()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<(PlayerId, SyncMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }
}

/// A client with its own clock. Tests advance both clocks to model transit time.
#[allow(dead_code)]
pub struct ScriptedClient {
    pub player: PlayerId,
    pub clock: ManualClock,
    pub client: ClientTimeCoordinator,
}

#[allow(dead_code)]
impl ScriptedClient {
    /// A client whose clock reads `skew_ms` ahead of the match clock at match start.
    pub fn new(player: PlayerId, skew_ms: f64) -> Self {
        let clock = ManualClock::starting_at(skew_ms);
        Self {
            player,
            client: ClientTimeCoordinator::new(clock.clone()),
            clock,
        }
    }

    /// Answers `ping` on the client's current clock reading.
    pub fn reply(&mut self, ping: Ping) -> Pong {
        self.client.handle_ping(ping, |_| {})
    }

    /// Hands `pong` to the server as if it just arrived.
    pub fn deliver(&self, coordinator: &mut TimeCoordinator, pong: Pong) -> PongOutcome {
        coordinator.handle_pong(self.player, pong.client_time, pong.server_time)
    }
}
