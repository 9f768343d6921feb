//! Transport abstraction for the bingo event stream.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and server. Every frame is one JSON document, so implementations
//! handle framing internally (WebSocket frames, SSE lines, length prefixes).
//!
//! # Connection Setup
//!
//! Unlike a one-shot client, the round synchronization engine must re-open its
//! connection after every drop. The [`Connector`] trait is the factory the
//! session calls for each (re)connect attempt; it owns the endpoint and the
//! credential, and hands back a freshly connected [`Transport`].
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use bingo_round_sync::error::BingoSyncError;
//! use bingo_round_sync::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), BingoSyncError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&mut self) -> Result<Box<dyn Transport>, BingoSyncError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::BingoSyncError;

/// A bidirectional text message transport.
///
/// Implementors shuttle serialized JSON strings between the client and server.
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// This trait is object-safe; the session stores the live connection as
/// `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), BingoSyncError>;
}

/// Opens authenticated transports on demand.
///
/// The credential is attached here, at connection time. A connector that
/// learns the credential was refused must return an error for which
/// [`BingoSyncError::is_auth`] is `true`; the session then tears down instead
/// of retrying.
#[async_trait]
pub trait Connector: Send + 'static {
    /// Establish a new connection.
    async fn connect(&mut self) -> Result<Box<dyn Transport>, BingoSyncError>;
}
