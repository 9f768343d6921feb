//! WebSocket transport using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries one JSON frame per WebSocket text message.
//! [`WebSocketConnector`] opens a fresh transport for every (re)connect and
//! attaches the bearer credential to the upgrade request. Both `ws://` and
//! `wss://` URLs are supported.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), bingo_round_sync::BingoSyncError> {
//! use bingo_round_sync::{Connector, Transport, WebSocketConnector};
//!
//! let mut connector = WebSocketConnector::new("wss://bingo.example.com/ws").with_token("secret");
//! let mut transport = connector.connect().await?;
//!
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("received: {frame}");
//! }
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::error::BingoSyncError;
use crate::transport::{Connector, Transport};

/// The underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to `url` without a credential.
    ///
    /// # Errors
    ///
    /// See [`connect_with_token`](Self::connect_with_token).
    pub async fn connect(url: &str) -> Result<Self, BingoSyncError> {
        Self::connect_with_token(url, None).await
    }

    /// Connect to `url`, sending `token` as `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::Unauthorized`] if the server answers the
    /// upgrade with 401 or 403, and [`BingoSyncError::Io`] for every other
    /// failure (the I/O [`ErrorKind`](std::io::ErrorKind) is preserved where
    /// there is one).
    pub async fn connect_with_token(url: &str, token: Option<&str>) -> Result<Self, BingoSyncError> {
        tracing::debug!(url = %url, authenticated = token.is_some(), "connecting to WebSocket server");

        let mut request = url.into_client_request().map_err(map_connect_error)?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                BingoSyncError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;

        tracing::info!(url = %url, "WebSocket connection established");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

fn map_connect_error(e: WsError) -> BingoSyncError {
    match &e {
        WsError::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            BingoSyncError::Unauthorized(format!("handshake rejected: {}", response.status()))
        }
        WsError::Io(io) => BingoSyncError::Io(std::io::Error::new(io.kind(), e)),
        _ => BingoSyncError::Io(std::io::Error::other(e)),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
        if self.closed {
            return Err(BingoSyncError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(BingoSyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), BingoSyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] to a fixed URL on every connect.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    /// Send `token` as a bearer credential on every connect.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>, BingoSyncError> {
        let transport =
            WebSocketTransport::connect_with_token(&self.url, self.token.as_deref()).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
        assert_send::<WebSocketConnector>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, BingoSyncError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, BingoSyncError::Io(_)));
        assert!(!err.is_auth());
    }

    // ── Mock-server helpers ──────────────────────────────────────────────

    /// Accept one connection, run `handler` on it and return the URL.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_text_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"event":"room-pending"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"event":"room-pending"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xB1, 0x60].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, BingoSyncError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_sends_bearer_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(None::<String>));
        let sink = Arc::clone(&seen);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let header = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *sink.lock().unwrap() = header;
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let mut connector = WebSocketConnector::new(format!("ws://{addr}")).with_token("s3cret");
        let mut transport = connector.connect().await.unwrap();
        let _ = transport.recv().await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Bearer s3cret"));
    }

    #[tokio::test]
    async fn rejected_handshake_is_unauthorized() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                let mut denied = ErrorResponse::new(Some("token expired".into()));
                *denied.status_mut() = StatusCode::UNAUTHORIZED;
                Err(denied)
            };
            let _ = tokio_tungstenite::accept_hdr_async(tcp, callback).await;
        });

        let mut connector = WebSocketConnector::new(format!("ws://{addr}")).with_token("stale");
        let err = connector.connect().await.map(|_| ()).unwrap_err();
        assert!(err.is_auth(), "expected auth error, got {err:?}");
    }
}
