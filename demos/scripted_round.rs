//! # Scripted Round Example
//!
//! Runs a complete bingo round against an in-memory server, with no network:
//!
//! 1. Implement [`Transport`], [`Connector`] and [`RoomApi`] over channels
//! 2. Script a round: countdown, number calls (with a duplicate and a stale
//!    event), a win claim and the cleanup that starts the next round
//! 3. Watch the session's view and events react
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_round
//! RUST_LOG=bingo_round_sync=debug cargo run --example scripted_round
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bingo_round_sync::protocol::{
    CalledNumber, ClaimVerdictPayload, NumberCalledPayload, RoomInfo, RoundCleanupPayload,
    RoundNumber, RoundSnapshot, RoundStartingPayload, Winner,
};
use bingo_round_sync::{
    BingoSyncError, ClientMessage, Connector, RoomApi, ServerEvent, SessionConfig, SyncEvent,
    SyncSession, Transport,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

// ── In-memory transport ─────────────────────────────────────────────

/// One end of an in-memory connection. Frames from the "server" arrive on
/// `inbound`; client frames go out on `outbound`.
struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
        self.outbound
            .send(message)
            .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), BingoSyncError> {
        self.inbound.close();
        Ok(())
    }
}

/// Hands out a single pre-built transport.
struct OnceConnector(Option<ChannelTransport>);

#[async_trait]
impl Connector for OnceConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>, BingoSyncError> {
        match self.0.take() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(BingoSyncError::TransportClosed),
        }
    }
}

/// A REST API with nothing to report yet.
struct EmptyRoomApi;

#[async_trait]
impl RoomApi for EmptyRoomApi {
    async fn fetch_room(&self, room_id: u64) -> Result<RoomInfo, BingoSyncError> {
        Ok(RoomInfo {
            room_id,
            status: Default::default(),
            current_round: None,
        })
    }

    async fn fetch_called_numbers(
        &self,
        _room_id: u64,
        _round: RoundNumber,
    ) -> Result<Vec<CalledNumber>, BingoSyncError> {
        Ok(Vec::new())
    }

    async fn fetch_winners(&self, _room_id: u64) -> Result<Vec<Winner>, BingoSyncError> {
        Ok(Vec::new())
    }

    async fn fetch_server_time(&self) -> Result<DateTime<Utc>, BingoSyncError> {
        Ok(Utc::now())
    }

    async fn fetch_snapshot(&self, room_id: u64) -> Result<RoundSnapshot, BingoSyncError> {
        Ok(RoundSnapshot {
            room_id: Some(room_id),
            ..RoundSnapshot::default()
        })
    }
}

// ── Script ──────────────────────────────────────────────────────────

fn frame(event: ServerEvent) -> Result<String, BingoSyncError> {
    event.encode()
}

fn called(round_number: RoundNumber, number: &str) -> ServerEvent {
    ServerEvent::NumberCalled(NumberCalledPayload {
        round_number,
        number: number.into(),
        called_at: None,
    })
}

/// The fake server: announces a round, calls numbers, then answers the
/// first claim it sees.
async fn run_server(
    to_client: mpsc::UnboundedSender<String>,
    mut from_client: mpsc::UnboundedReceiver<String>,
) -> Result<(), BingoSyncError> {
    let pause = || tokio::time::sleep(Duration::from_millis(300));

    let _join = from_client.recv().await;
    let starting = ServerEvent::RoundStarting(RoundStartingPayload {
        round_number: 1,
        pattern: Some("line".into()),
        prize_amount: Some(20.0),
        seconds_remaining: Some(1.0),
        finish_at: None,
    });
    to_client.send(frame(starting)?).ok();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    for number in ["B-1", "I-16", "I-16", "N-31", "G-46", "O-61"] {
        to_client.send(frame(called(1, number))?).ok();
        pause().await;
    }
    while let Some(text) = from_client.recv().await {
        if let Ok(ClientMessage::SubmitClaim(request)) = serde_json::from_str(&text) {
            let verdict = ServerEvent::ClaimVerdict(ClaimVerdictPayload {
                request_id: request.request_id,
                round_number: request.round_number,
                card_id: request.card_id,
                accepted: true,
                code: None,
                message: None,
            });
            to_client.send(frame(verdict)?).ok();
            break;
        }
    }

    pause().await;
    let cleanup = ServerEvent::RoundCleanup(RoundCleanupPayload { round_number: 1 });
    to_client.send(frame(cleanup)?).ok();
    pause().await;
    // A straggler from the round that just ended; the session drops it.
    to_client.send(frame(called(1, "O-75"))?).ok();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let connector = OnceConnector(Some(ChannelTransport {
        inbound: client_rx,
        outbound: client_tx,
    }));
    let server = tokio::spawn(run_server(server_tx, server_rx));

    let config = SessionConfig::new().with_room(1);
    let (mut session, mut events) = SyncSession::open(connector, EmptyRoomApi, config);

    let card = ["B-1", "I-16", "N-31", "G-46", "O-61"];
    let deadline = tokio::time::sleep(Duration::from_secs(6));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SyncEvent::NumberCalled { number, .. } => {
                        let view = session.current();
                        println!("called {:<5} total {}", number.value, view.called_numbers.len());
                        if card.iter().all(|v| view.is_called(v)) && !view.won_this_round {
                            let marked = card.iter().map(|v| (*v).to_string()).collect();
                            let outcome = session.submit_claim(7, marked).await?;
                            println!("claim → {outcome:?}");
                        }
                    }
                    SyncEvent::CountdownTick(seconds) => println!("countdown {seconds:?}"),
                    SyncEvent::RoundAdvanced { from, to } => {
                        let view = session.current();
                        println!(
                            "round {from} → {to}: {} numbers, won={}",
                            view.called_numbers.len(),
                            view.won_this_round
                        );
                    }
                    SyncEvent::PhaseChanged { to, .. } => println!("phase → {to:?}"),
                    SyncEvent::Closed { .. } => break,
                    _ => {}
                }
            }
            () = &mut deadline => break,
        }
    }

    let view = session.current();
    println!(
        "final: round {} phase {:?}, called {:?}",
        view.round_number,
        view.phase,
        view.called_numbers.iter().map(|n| n.value.as_str()).collect::<Vec<_>>()
    );

    session.close().await;
    server.await??;
    Ok(())
}
