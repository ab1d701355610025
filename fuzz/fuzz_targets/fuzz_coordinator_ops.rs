//! Fuzz target for the match time coordinator.
//!
//! Drives a [`TimeCoordinator`] on a manual clock with an arbitrary sequence
//! of clock advances, pongs (echoing real or forged stamps), action checks and
//! commits, session changes, resyncs and a final close.
//!
//! # Safety Properties Tested
//! - No panics on any operation sequence
//! - Server time estimates are never negative
//! - A player's committed action times never go backwards
//! - A stamp is never applied more often than it was issued
//! - Internal invariants hold after every step

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use duel_timesync::telemetry::InvariantChecker;
use duel_timesync::{
    ManualClock, PeerSender, PlayerId, SyncMessage, TimeCoordinatorBuilder,
    TimeSyncConfig,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
struct Outbox(Rc<RefCell<Vec<(PlayerId, f64)>>>);

impl PeerSender for Outbox {
    fn forward(&mut self, player: PlayerId, message: SyncMessage) {
        if let SyncMessage::Ping(ping) = message {
            self.0.borrow_mut().push((player, ping.server_time));
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    /// Advance the match clock by up to ~65 s and poll the schedule.
    Advance(u16),
    /// Answer the n-th ping sent so far (wrapped), with a client clock skew.
    AnswerSent { index: u16, skew: i16 },
    /// Answer with a forged stamp.
    Forged { player: u8, stamp: f64, client_time: f64 },
    /// Check an action and commit it if accepted.
    Action { player: u8, client_time: f64 },
    /// Commit without checking first.
    Commit { player: u8, client_time: f64 },
    Add(u8),
    Remove(u8),
    Resync(u8),
    Close,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    max_players: u8,
    start_late: bool,
    ops: Vec<Op>,
}

fn player(raw: u8) -> PlayerId {
    PlayerId::new(usize::from(raw % 4))
}

fuzz_target!(|input: FuzzInput| {
    let clock = ManualClock::new();
    let outbox = Outbox::default();
    let max_players = usize::from(input.max_players % 4) + 1;

    let Ok(builder) = TimeCoordinatorBuilder::new()
        .with_config(TimeSyncConfig::default())
        .with_max_players(max_players)
    else {
        return;
    };
    let Ok(mut coordinator) = builder.with_clock(clock.clone()).build(outbox.clone()) else {
        return;
    };

    if !input.start_late {
        coordinator.start();
    }

    let mut answered: Vec<(PlayerId, f64)> = Vec::new();
    let mut last_commit = [f64::NEG_INFINITY; 4];

    for op in input.ops.into_iter().take(256) {
        match op {
            Op::Advance(ms) => {
                clock.advance(f64::from(ms));
                if !coordinator.is_started() {
                    coordinator.start();
                }
                let _ = coordinator.poll();
            },
            Op::AnswerSent { index, skew } => {
                let sent = outbox.0.borrow();
                if sent.is_empty() {
                    continue;
                }
                let (to, stamp) = sent[usize::from(index) % sent.len()];
                let issued = sent.iter().filter(|&&entry| entry == (to, stamp)).count();
                drop(sent);
                let client_time = coordinator.server_time().unwrap_or(0.0) + f64::from(skew);
                let outcome = coordinator.handle_pong(to, client_time, stamp);
                if outcome.is_applied() {
                    answered.push((to, stamp));
                    let applied = answered.iter().filter(|&&entry| entry == (to, stamp)).count();
                    // the same stamp can be issued again on a resync in the same millisecond
                    assert!(applied <= issued, "stamp applied more often than issued");
                }
            },
            Op::Forged {
                player: p,
                stamp,
                client_time,
            } => {
                let _ = coordinator.handle_pong(player(p), client_time, stamp);
            },
            Op::Action {
                player: p,
                client_time,
            } => {
                let id = player(p);
                if let Some(server_time) = coordinator.assess_timing(id, client_time).server_time() {
                    assert!(server_time >= 0.0, "negative estimate {server_time}");
                    let committed = coordinator.update_last_action_time(id, "set_cell", client_time);
                    assert!(committed >= 0.0);
                    if coordinator.contains_player(id) {
                        let slot = id.as_usize();
                        assert!(committed >= last_commit[slot], "commit went backwards");
                        last_commit[slot] = committed;
                    }
                }
            },
            Op::Commit {
                player: p,
                client_time,
            } => {
                let id = player(p);
                let committed = coordinator.update_last_action_time(id, "set_cell", client_time);
                assert!(committed >= 0.0, "negative commit {committed}");
                if coordinator.contains_player(id) {
                    let slot = id.as_usize();
                    assert!(committed >= last_commit[slot], "commit went backwards");
                    last_commit[slot] = committed;
                }
            },
            Op::Add(p) => {
                let _ = coordinator.add_player_session(player(p));
            },
            Op::Remove(p) => {
                let id = player(p);
                if coordinator.remove_player_session(id) {
                    last_commit[id.as_usize()] = f64::NEG_INFINITY;
                    answered.retain(|(who, _)| *who != id);
                }
            },
            Op::Resync(p) => {
                let _ = coordinator.force_resync(player(p));
            },
            Op::Close => coordinator.close(),
        }

        assert!(coordinator.check_invariants().is_ok());
    }
});
