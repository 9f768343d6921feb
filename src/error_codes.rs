//! Error codes sent by the bingo server.
//!
//! These codes are wire-compatible with the server's error enum and
//! serialize using `SCREAMING_SNAKE_CASE` (e.g. `"CARD_ALREADY_CLAIMED"`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::claim::ClaimRejection;

/// Structured error codes returned by the bingo server, either on a
/// `claim-verdict` or on a generic `error` event.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    Unauthorized,
    InvalidToken,
    TokenExpired,

    // Claim errors
    InvalidPattern,
    CardAlreadyClaimed,
    PlayerAlreadyWon,
    NumbersNotCalled,
    RoundNotActive,
    CardNotFound,

    // Room errors
    RoomNotFound,
    RoomFinished,
    NotInRoom,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code, suitable for
    /// showing to the player.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Your session is not authorized. Please sign in again.",
            Self::InvalidToken => {
                "Your session token is invalid. Please sign in again to keep playing."
            }
            Self::TokenExpired => "Your session has expired. Please sign in again.",

            Self::InvalidPattern => {
                "That card does not complete this round's pattern yet. Keep playing!"
            }
            Self::CardAlreadyClaimed => "This card has already been claimed this round.",
            Self::PlayerAlreadyWon => "You have already won this round.",
            Self::NumbersNotCalled => {
                "Some marked numbers were never called. Your board is out of sync; please reload."
            }
            Self::RoundNotActive => "Claims are not being accepted for this round right now.",
            Self::CardNotFound => "That card does not belong to you in this room.",

            Self::RoomNotFound => "The room could not be found. It may have been closed.",
            Self::RoomFinished => "This room has finished. No further rounds will be played.",
            Self::NotInRoom => "You are not currently in this room.",

            Self::RateLimitExceeded => "Too many requests. Please wait a moment and try again.",

            Self::InternalError => {
                "An internal server error occurred. Please try again in a moment."
            }
            Self::ServiceUnavailable => {
                "The game service is temporarily unavailable. Please try again shortly."
            }
        }
    }

    /// Returns `true` if this code means the session credential was refused.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::InvalidToken | Self::TokenExpired
        )
    }

    /// Maps a claim-verdict code onto the rejection cause it represents.
    pub fn claim_rejection(&self) -> ClaimRejection {
        match self {
            Self::InvalidPattern => ClaimRejection::PatternInvalid,
            Self::CardAlreadyClaimed => ClaimRejection::CardAlreadyClaimed,
            Self::PlayerAlreadyWon => ClaimRejection::PlayerAlreadyWon,
            Self::RoundNotActive | Self::RoomFinished => ClaimRejection::RoundNotClaimable,
            other => ClaimRejection::Server(*other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
