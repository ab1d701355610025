//! Errors returned by coordinator lifecycle and configuration calls.
//!
//! Timing rejections are not errors: they come back as
//! [`TimingAssessment::Rejected`](crate::TimingAssessment::Rejected).

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::PlayerId;

/// Everything the coordinator can refuse to do.
///
/// Timing rejections are *not* errors: they come back as
/// [`TimingAssessment::Rejected`](crate::TimingAssessment::Rejected) because a
/// rejected action is an expected, frequent outcome. This enum only covers
/// host-side programming errors and invalid configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSyncError {
    /// A time conversion was requested before [`TimeCoordinator::start`] established the match clock.
    ///
    /// [`TimeCoordinator::start`]: crate::TimeCoordinator::start
    NotStarted,
    /// The coordinator has been closed and no longer accepts this request.
    Closed,
    /// The player has no session in this match.
    UnknownPlayer {
        /// The player that was looked up.
        player: PlayerId,
    },
    /// You made an invalid request, usually by passing a wrong parameter.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        kind: InvalidRequestKind,
    },
    /// A [`TimeSyncConfig`](crate::TimeSyncConfig) field failed validation.
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Specific reasons for [`TimeSyncError::InvalidRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum InvalidRequestKind {
    /// The player id does not fit in the match's player table.
    PlayerSlotOutOfRange {
        /// The rejected player.
        player: PlayerId,
        /// Number of slots in the match.
        max_players: usize,
    },
    /// A match needs at least one player slot.
    ZeroPlayers,
}

impl Display for InvalidRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerSlotOutOfRange {
                player,
                max_players,
            } => {
                write!(
                    f,
                    "player {} is out of range for a match with {} slots",
                    player, max_players
                )
            },
            Self::ZeroPlayers => write!(f, "a match needs at least one player slot"),
        }
    }
}

impl Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => {
                write!(
                    f,
                    "The match clock has not been started; call start() before converting times."
                )
            },
            Self::Closed => write!(f, "The time coordinator has been closed."),
            Self::UnknownPlayer { player } => {
                write!(f, "Player {} has no session in this match.", player)
            },
            Self::InvalidRequest { kind } => write!(f, "Invalid Request: {}", kind),
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for `{}`: {}", field, reason)
            },
        }
    }
}

impl Error for TimeSyncError {}

impl From<InvalidRequestKind> for TimeSyncError {
    fn from(kind: InvalidRequestKind) -> Self {
        Self::InvalidRequest { kind }
    }
}
