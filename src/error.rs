//! Error types for the bingo round synchronization engine.

use thiserror::Error;

/// Errors that can occur while driving a [`SyncSession`](crate::SyncSession).
///
/// Claim rejections are deliberately absent: they are ordinary results and
/// come back as [`ClaimOutcome`](crate::claim::ClaimOutcome) values.
#[derive(Debug, Error)]
pub enum BingoSyncError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame decoded but failed semantic validation.
    #[error("malformed {event} event: {reason}")]
    MalformedEvent {
        /// Wire name of the offending event, or `"unknown"`.
        event: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Attempted an operation that requires an active connection.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a room-scoped operation without having joined a room.
    #[error("not in a room")]
    NotInRoom,

    /// The server refused the session credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A collaborator REST call returned a non-success status.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The HTTP client failed before a response was received.
    #[cfg(feature = "http-api")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The session's background loop is no longer running.
    #[error("session closed")]
    SessionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BingoSyncError {
    /// Returns `true` for credential rejections, which are fatal for the
    /// session and must not be retried automatically.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub(crate) fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized [`Result`] type for round synchronization operations.
pub type Result<T> = std::result::Result<T, BingoSyncError>;
