//! Collaborator REST calls.
//!
//! The engine needs four things from the HTTP API: room/round metadata,
//! historical called numbers (backfill after a hard reload), winners once the
//! room is finished, and the server's clock. [`RoomApi`] abstracts them so
//! tests can script responses; [`HttpRoomApi`] talks to the real server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::protocol::{CalledNumber, RoomId, RoomInfo, RoundNumber, RoundSnapshot, Winner};

/// HTTP calls the engine issues.
#[async_trait]
pub trait RoomApi: Send + Sync + 'static {
    /// Current room status and round metadata.
    async fn fetch_room(&self, room_id: RoomId) -> Result<RoomInfo>;

    /// Every number called so far in `round`, in call order.
    async fn fetch_called_numbers(
        &self,
        room_id: RoomId,
        round: RoundNumber,
    ) -> Result<Vec<CalledNumber>>;

    /// Winners of every round in the room.
    async fn fetch_winners(&self, room_id: RoomId) -> Result<Vec<Winner>>;

    /// The server's current time.
    async fn fetch_server_time(&self) -> Result<DateTime<Utc>>;

    /// A full snapshot of the room's current round.
    ///
    /// The default composes [`fetch_room`](Self::fetch_room) with
    /// [`fetch_called_numbers`](Self::fetch_called_numbers). Override it when
    /// the server offers a single snapshot endpoint.
    async fn fetch_snapshot(&self, room_id: RoomId) -> Result<RoundSnapshot> {
        let room = self.fetch_room(room_id).await?;
        let called = match &room.current_round {
            Some(round) => self.fetch_called_numbers(room_id, round.number).await?,
            None => Vec::new(),
        };
        Ok(RoundSnapshot::from_parts(room, called))
    }
}

#[cfg(feature = "http-api")]
pub use http::HttpRoomApi;

#[cfg(feature = "http-api")]
mod http {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::de::DeserializeOwned;
    use serde::Deserialize;

    use super::RoomApi;
    use crate::error::{BingoSyncError, Result};
    use crate::protocol::{CalledNumber, RoomId, RoomInfo, RoundNumber, Winner};

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ServerTime {
        server_time: DateTime<Utc>,
    }

    /// [`RoomApi`] over HTTPS with a bearer credential.
    #[derive(Debug, Clone)]
    pub struct HttpRoomApi {
        client: reqwest::Client,
        base_url: String,
        token: Option<String>,
    }

    impl HttpRoomApi {
        /// Create a client for `base_url` (e.g. `https://bingo.example.com`).
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), base_url)
        }

        /// Use a preconfigured [`reqwest::Client`].
        pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
            Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token: None,
            }
        }

        /// Attach a bearer credential to every request.
        #[must_use]
        pub fn with_token(mut self, token: impl Into<String>) -> Self {
            self.token = Some(token.into());
            self
        }

        async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
            let url = format!("{}{}", self.base_url, path);
            tracing::debug!(%url, "api request");
            let mut request = self.client.get(&url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            tracing::warn!(%url, status = status.as_u16(), %message, "api request failed");
            Err(BingoSyncError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    #[async_trait]
    impl RoomApi for HttpRoomApi {
        async fn fetch_room(&self, room_id: RoomId) -> Result<RoomInfo> {
            self.get(&format!("/api/rooms/{room_id}")).await
        }

        async fn fetch_called_numbers(
            &self,
            room_id: RoomId,
            round: RoundNumber,
        ) -> Result<Vec<CalledNumber>> {
            self.get(&format!("/api/rooms/{room_id}/rounds/{round}/called-numbers"))
                .await
        }

        async fn fetch_winners(&self, room_id: RoomId) -> Result<Vec<Winner>> {
            self.get(&format!("/api/rooms/{room_id}/winners")).await
        }

        async fn fetch_server_time(&self) -> Result<DateTime<Utc>> {
            let time: ServerTime = self.get("/api/time").await?;
            Ok(time.server_time)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::BingoSyncError;
    use crate::protocol::{Phase, RoomStatus, RoundInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        room: RoomInfo,
        called_fetches: AtomicUsize,
    }

    #[async_trait]
    impl RoomApi for Scripted {
        async fn fetch_room(&self, _room_id: RoomId) -> Result<RoomInfo> {
            Ok(self.room.clone())
        }

        async fn fetch_called_numbers(
            &self,
            _room_id: RoomId,
            round: RoundNumber,
        ) -> Result<Vec<CalledNumber>> {
            self.called_fetches.fetch_add(1, Ordering::SeqCst);
            assert_eq!(round, 4);
            Ok(vec![CalledNumber {
                value: "B-9".into(),
                called_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:05Z")
                    .unwrap()
                    .with_timezone(&Utc),
            }])
        }

        async fn fetch_winners(&self, _room_id: RoomId) -> Result<Vec<Winner>> {
            Ok(Vec::new())
        }

        async fn fetch_server_time(&self) -> Result<DateTime<Utc>> {
            Err(BingoSyncError::Timeout)
        }
    }

    #[tokio::test]
    async fn default_snapshot_backfills_called_numbers() {
        let api = Scripted {
            room: RoomInfo {
                room_id: 3,
                status: RoomStatus::Active,
                current_round: Some(RoundInfo {
                    number: 4,
                    phase: Phase::InProgress,
                    pattern: Some("line".into()),
                    prize_amount: 12.5,
                    last_called_at: None,
                }),
            },
            called_fetches: AtomicUsize::new(0),
        };
        let snapshot = api.fetch_snapshot(3).await.unwrap();
        let round = snapshot.round.unwrap();
        assert_eq!(round.number, 4);
        assert_eq!(round.called_numbers.len(), 1);
        assert!(round.last_called_at.is_some());
        assert_eq!(api.called_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_snapshot_without_round_skips_backfill() {
        let api = Scripted {
            room: RoomInfo {
                room_id: 3,
                status: RoomStatus::Waiting,
                current_round: None,
            },
            called_fetches: AtomicUsize::new(0),
        };
        let snapshot = api.fetch_snapshot(3).await.unwrap();
        assert!(snapshot.round.is_none());
        assert_eq!(api.called_fetches.load(Ordering::SeqCst), 0);
    }
}
