//! # Bingo Round Sync
//!
//! Client-side round synchronization engine for realtime multiplayer bingo.
//!
//! The server owns the game. This crate keeps a client's view of the live
//! round consistent with it over a reconnecting event stream: duplicate and
//! out-of-order delivery, several overlapping countdowns, and win claims that
//! race server-pushed transitions.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **Monotonic rounds**: stale events are dropped, newer rounds reset all per-round state
//! - **Authoritative snapshots**: reconciliation on join and on every reconnect
//! - **Server-clock countdowns**: absolute deadlines re-derived each tick
//! - **Exactly-once claims**: local pre-validation and a single in-flight submission
//! - **WebSocket and HTTP built in**: default `transport-websocket` and `http-api` features
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bingo_round_sync::{HttpRoomApi, SessionConfig, SyncEvent, SyncSession, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://bingo.example.com/ws").with_token(&token);
//! let api = HttpRoomApi::new("https://bingo.example.com").with_token(&token);
//! let (session, mut events) = SyncSession::open(connector, api, SessionConfig::new().with_room(42));
//!
//! while let Some(event) = events.recv().await {
//!     if let SyncEvent::NumberCalled { number, .. } = event {
//!         println!("called {}", number.value);
//!     }
//! }
//! ```

pub mod api;
pub mod claim;
pub mod clock;
pub mod connection;
pub mod countdown;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod listeners;
pub mod protocol;
pub mod reset;
pub mod round;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::RoomApi;
pub use claim::{ClaimOutcome, ClaimRejection};
pub use clock::{Clock, ManualClock, ServerClockOffset, SystemClock};
pub use connection::{ConnectionState, ReconnectPolicy, StateSubscription};
pub use error::{BingoSyncError, Result};
pub use error_codes::ErrorCode;
pub use event::SyncEvent;
pub use listeners::ListenerHandle;
pub use protocol::{ClientMessage, CountdownKind, EventKind, Phase, ServerEvent};
pub use reset::ResetDecision;
pub use session::{RoundView, SessionConfig, SyncSession};
pub use transport::{Connector, Transport};

#[cfg(feature = "http-api")]
pub use api::HttpRoomApi;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
