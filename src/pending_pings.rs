//! Ledger of pings the server has issued and not yet seen answered.
//!
//! The ledger is the single source of truth for "this server timestamp was
//! legitimately sent to this player". A pong is only applied if its echoed
//! stamp is found here, and finding it consumes it, so a replayed or guessed
//! stamp can never move a player's offset.

use std::collections::VecDeque;

use crate::player_table::PlayerTable;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{PlayerId, MAX_PENDING_PINGS, MAX_PING_AGE_MS};

/// Bounded, per-player record of outstanding ping stamps.
///
/// Each player's entries are kept in issue order. Entries are evicted oldest
/// first, both when the ledger grows past its capacity and when an entry
/// becomes older than the maximum age (measured on the match clock).
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing.
/// It is not part of the stable public API.
#[derive(Debug, Clone)]
pub struct PendingPingStore {
    ledgers: PlayerTable<VecDeque<f64>>,
    max_pending: usize,
    max_age_ms: f64,
}

impl Default for PendingPingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingPingStore {
    /// Creates a store with the standard limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(MAX_PENDING_PINGS, MAX_PING_AGE_MS)
    }

    /// Creates a store with custom limits.
    #[must_use]
    pub fn with_limits(max_pending: usize, max_age_ms: f64) -> Self {
        Self {
            ledgers: PlayerTable::new(),
            max_pending: max_pending.max(1),
            max_age_ms,
        }
    }

    /// Records that a ping stamped `server_time` went out to `player`.
    pub fn add_pending_ping(&mut self, player: PlayerId, server_time: f64) {
        let max_pending = self.max_pending;
        let max_age_ms = self.max_age_ms;
        let ledger = self
            .ledgers
            .get_or_insert_with(player, || VecDeque::with_capacity(max_pending));
        ledger.push_back(server_time);

        while ledger
            .front()
            .is_some_and(|&oldest| server_time - oldest > max_age_ms)
        {
            ledger.pop_front();
        }
        while ledger.len() > max_pending {
            ledger.pop_front();
        }

        crate::debug_check_invariants!(self, "after add_pending_ping");
    }

    /// Consumes the outstanding ping stamped `server_time`, if there is one.
    ///
    /// Order does not matter: pongs can arrive in any order relative to the
    /// pings that triggered them. Returns `false` and leaves the ledger alone
    /// if the stamp is unknown or already consumed.
    pub fn validate_and_consume_ping(&mut self, player: PlayerId, server_time: f64) -> bool {
        let Some(ledger) = self.ledgers.get_mut(player) else {
            return false;
        };
        match ledger.iter().position(|&stamp| stamp == server_time) {
            Some(index) => ledger.remove(index).is_some(),
            None => false,
        }
    }

    /// `false` once `player` has the maximum number of pings outstanding.
    #[must_use]
    pub fn can_receive_ping(&self, player: PlayerId) -> bool {
        self.pending_count(player) < self.max_pending
    }

    /// Stamp of the most recent still-outstanding ping to `player`.
    #[must_use]
    pub fn last_ping_time(&self, player: PlayerId) -> Option<f64> {
        self.ledgers
            .get(player)
            .and_then(|ledger| ledger.back().copied())
    }

    /// Number of outstanding pings for `player`.
    #[must_use]
    pub fn pending_count(&self, player: PlayerId) -> usize {
        self.ledgers.get(player).map_or(0, VecDeque::len)
    }

    /// Forgets everything about `player`.
    pub fn remove_player(&mut self, player: PlayerId) {
        self.ledgers.remove(player);
    }

    /// Forgets everything about every player.
    pub fn clear(&mut self) {
        self.ledgers.clear();
    }
}

impl InvariantChecker for PendingPingStore {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (player, ledger) in self.ledgers.iter() {
            if ledger.len() > self.max_pending {
                return Err(
                    InvariantViolation::new("PendingPingStore", "ledger exceeds capacity")
                        .with_details(format!(
                            "player={}, len={}, max={}",
                            player,
                            ledger.len(),
                            self.max_pending
                        )),
                );
            }
            if ledger.iter().zip(ledger.iter().skip(1)).any(|(a, b)| a > b) {
                return Err(InvariantViolation::new(
                    "PendingPingStore",
                    "ledger is not in issue order",
                )
                .with_details(format!("player={}", player)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P0: PlayerId = PlayerId::new(0);
    const P1: PlayerId = PlayerId::new(1);

    #[test]
    fn consume_known_stamp_once() {
        let mut store = PendingPingStore::new();
        store.add_pending_ping(P0, 2000.0);
        assert!(store.validate_and_consume_ping(P0, 2000.0));
        assert!(!store.validate_and_consume_ping(P0, 2000.0));
    }

    #[test]
    fn unknown_stamp_leaves_ledger_alone() {
        let mut store = PendingPingStore::new();
        store.add_pending_ping(P0, 100.0);
        assert!(!store.validate_and_consume_ping(P0, 101.0));
        assert_eq!(store.pending_count(P0), 1);
    }

    #[test]
    fn stamps_are_per_player() {
        let mut store = PendingPingStore::new();
        store.add_pending_ping(P0, 100.0);
        assert!(!store.validate_and_consume_ping(P1, 100.0));
        assert!(store.validate_and_consume_ping(P0, 100.0));
    }

    #[test]
    fn out_of_order_consumption() {
        let mut store = PendingPingStore::new();
        for t in [0.0, 2000.0, 4000.0] {
            store.add_pending_ping(P0, t);
        }
        assert!(store.validate_and_consume_ping(P0, 4000.0));
        assert!(store.validate_and_consume_ping(P0, 0.0));
        assert_eq!(store.last_ping_time(P0), Some(2000.0));
        assert_eq!(store.pending_count(P0), 1);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut store = PendingPingStore::new();
        for i in 0..12 {
            store.add_pending_ping(P0, i as f64 * 100.0);
        }
        assert_eq!(store.pending_count(P0), MAX_PENDING_PINGS);
        assert!(!store.validate_and_consume_ping(P0, 0.0));
        assert!(!store.validate_and_consume_ping(P0, 100.0));
        assert!(store.validate_and_consume_ping(P0, 200.0));
    }

    #[test]
    fn stale_entries_age_out() {
        let mut store = PendingPingStore::new();
        store.add_pending_ping(P0, 0.0);
        store.add_pending_ping(P0, 5000.0);
        store.add_pending_ping(P0, 10_000.0);
        // exactly MAX_PING_AGE old is still kept
        assert_eq!(store.pending_count(P0), 3);

        store.add_pending_ping(P0, 10_001.0);
        assert_eq!(store.pending_count(P0), 3);
        assert!(!store.validate_and_consume_ping(P0, 0.0));
    }

    #[test]
    fn circuit_breaker_trips_at_capacity() {
        let mut store = PendingPingStore::new();
        for i in 0..MAX_PENDING_PINGS - 1 {
            store.add_pending_ping(P0, i as f64);
            assert!(store.can_receive_ping(P0));
        }
        store.add_pending_ping(P0, 100.0);
        assert!(!store.can_receive_ping(P0));
        assert!(store.can_receive_ping(P1));
    }

    #[test]
    fn last_ping_time_tracks_newest() {
        let mut store = PendingPingStore::new();
        assert_eq!(store.last_ping_time(P0), None);
        store.add_pending_ping(P0, 10.0);
        store.add_pending_ping(P0, 20.0);
        assert_eq!(store.last_ping_time(P0), Some(20.0));
    }

    #[test]
    fn remove_and_clear() {
        let mut store = PendingPingStore::new();
        store.add_pending_ping(P0, 1.0);
        store.add_pending_ping(P1, 2.0);
        store.remove_player(P0);
        assert_eq!(store.pending_count(P0), 0);
        assert_eq!(store.pending_count(P1), 1);
        store.clear();
        assert_eq!(store.pending_count(P1), 0);
    }

    #[test]
    fn invariants_hold() {
        let mut store = PendingPingStore::with_limits(3, 1000.0);
        for i in 0..20 {
            store.add_pending_ping(P1, i as f64 * 150.0);
            assert!(store.check_invariants().is_ok());
        }
    }
}
