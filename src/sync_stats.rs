//! Read-only per-player diagnostics.

use std::fmt;

use serde::Serialize;

use crate::PlayerId;

/// Coarse health of a player's clock synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQuality {
    /// Synced recently with RTT under 50ms.
    Good,
    /// Synced recently with RTT between 50ms and 100ms.
    Degraded,
    /// Never synced, not refreshed recently, or RTT of 100ms or more.
    Lost,
}

impl SyncQuality {
    /// Classifies a synced, fresh profile by its RTT.
    #[must_use]
    pub fn from_rtt(rtt_ms: f64) -> Self {
        if rtt_ms < 50.0 {
            Self::Good
        } else if rtt_ms < 100.0 {
            Self::Degraded
        } else {
            Self::Lost
        }
    }
}

impl fmt::Display for SyncQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Degraded => write!(f, "degraded"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Snapshot of everything the coordinator knows about one player's timing.
///
/// Produced by [`TimeCoordinator::sync_stats`](crate::TimeCoordinator::sync_stats).
/// Intended for dashboards and match logs; nothing in here feeds back into
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    /// The player described.
    pub player: PlayerId,
    /// Median clock offset, `client - server`, in milliseconds.
    pub offset: f64,
    /// Most recent round-trip time in milliseconds.
    pub rtt: f64,
    /// Offset captured at the first sync.
    pub initial_offset: f64,
    /// Offset samples in the median window.
    pub samples: usize,
    /// Pings sent and not yet answered.
    pub pending_pings: usize,
    /// Committed actions remembered for this player.
    pub action_history: usize,
    /// Server time of the last profile update.
    pub last_updated: f64,
    /// Whether at least one pong has been applied.
    pub synced: bool,
    /// Whether the profile has gone without an update for longer than the ping age limit.
    pub stale: bool,
    /// Derived health indicator.
    pub quality: SyncQuality,
}

impl SyncStats {
    /// Derives [`SyncQuality`] from the sync flags and RTT.
    #[must_use]
    pub fn classify(synced: bool, stale: bool, rtt: f64) -> SyncQuality {
        if !synced || stale {
            SyncQuality::Lost
        } else {
            SyncQuality::from_rtt(rtt)
        }
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "player {}: offset={:.1}ms rtt={:.1}ms pending={} quality={}",
            self.player, self.offset, self.rtt, self.pending_pings, self.quality
        )
    }
}
