//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: a recording [`PeerSender`](duel_timesync::PeerSender) and a scripted client
//! - `init_tracing`: log capture for failing tests
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! mod common;
//! use common::{coordinator_with, RecordingSender};
//! ```

pub mod stubs;

use std::sync::Arc;

use duel_timesync::telemetry::CollectingObserver;
use duel_timesync::{ManualClock, TimeCoordinator, TimeCoordinatorBuilder, TimeSyncConfig};

#[allow(unused_imports)]
pub use stubs::{RecordingSender, ScriptedClient};

/// Everything a test needs to drive one match.
#[allow(dead_code)]
pub struct Harness {
    pub coordinator: TimeCoordinator,
    pub clock: ManualClock,
    pub sender: RecordingSender,
    pub observer: Arc<CollectingObserver>,
}

#[allow(dead_code)]
impl Harness {
    /// Advances the match clock and polls the scheduler.
    pub fn advance(&mut self, ms: f64) -> usize {
        self.clock.advance(ms);
        self.coordinator.poll()
    }
}

/// Routes `tracing` output to the test harness. Set `RUST_LOG=duel_timesync=trace` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds an unstarted coordinator on a manual clock with the given policy.
#[allow(dead_code)]
pub fn coordinator_with(config: TimeSyncConfig) -> Harness {
    init_tracing();
    let clock = ManualClock::new();
    let sender = RecordingSender::new();
    let observer = Arc::new(CollectingObserver::new());
    let coordinator = TimeCoordinatorBuilder::new()
        .with_config(config)
        .with_clock(clock.clone())
        .with_violation_observer(observer.clone())
        .build(sender.clone())
        .expect("valid test configuration");
    Harness {
        coordinator,
        clock,
        sender,
        observer,
    }
}

/// Builds an unstarted coordinator with the production policy.
#[allow(dead_code)]
pub fn coordinator() -> Harness {
    coordinator_with(TimeSyncConfig::default())
}
