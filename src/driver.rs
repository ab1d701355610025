//! Tokio task that keeps a coordinator's ping schedule running.
//!
//! [`TimeCoordinator`] never spawns anything on its own; the schedule only
//! advances when [`TimeCoordinator::poll`] is called. Hosts that already run
//! an event loop per room can call `poll` from there. Hosts built on tokio can
//! hand the coordinator to a [`PingDriver`] instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use duel_timesync::{PeerSender, PingDriver, PlayerId, SyncMessage, TimeCoordinatorBuilder};
//! use parking_lot::Mutex;
//!
//! struct RoomSender;
//! impl PeerSender for RoomSender {
//!     fn forward(&mut self, _player: PlayerId, _message: SyncMessage) {}
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), duel_timesync::TimeSyncError> {
//!     let mut coordinator = TimeCoordinatorBuilder::new().build(RoomSender)?;
//!     coordinator.add_player_session(PlayerId::new(0))?;
//!     coordinator.start();
//!
//!     let coordinator = Arc::new(Mutex::new(coordinator));
//!     let driver = PingDriver::new(Arc::clone(&coordinator)).spawn();
//!
//!     // ... room handlers lock `coordinator` for pongs and actions ...
//!
//!     coordinator.lock().close();
//!     let _ = driver.await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use web_time::Duration;

use crate::TimeCoordinator;

/// Polls a shared [`TimeCoordinator`] on a fixed tick until it is closed.
///
/// The lock is only held for the duration of one `poll`, so room handlers
/// locking the same coordinator for pongs and actions still run one at a time
/// relative to the tick.
#[derive(Debug)]
#[must_use = "PingDriver does nothing until run() or spawn() is called"]
pub struct PingDriver {
    coordinator: Arc<Mutex<TimeCoordinator>>,
    tick: Duration,
}

impl PingDriver {
    /// Creates a driver that polls every `min_ping_interval` of the coordinator's policy.
    pub fn new(coordinator: Arc<Mutex<TimeCoordinator>>) -> Self {
        let tick = coordinator.lock().config().min_ping_interval;
        Self { coordinator, tick }
    }

    /// Overrides the polling tick. A zero tick is ignored.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        if !tick.is_zero() {
            self.tick = tick;
        }
        self
    }

    /// The polling tick.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Polls until the coordinator is closed.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let closed = {
                let mut coordinator = self.coordinator.lock();
                if coordinator.is_closed() {
                    true
                } else {
                    coordinator.poll();
                    false
                }
            };
            if closed {
                debug!("Ping driver exiting: coordinator closed");
                break;
            }
        }
    }

    /// Runs the driver on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
