//! # Watch Room Example
//!
//! Follows one bingo room end to end:
//!
//! 1. Measure the server clock offset and connect over WebSocket
//! 2. Join a room and reconcile from the REST snapshot
//! 3. Print called numbers, countdowns and round transitions
//! 4. Claim automatically once a demo card is fully called
//! 5. Shut down gracefully on Ctrl+C, auth failure or room end
//!
//! ## Running
//!
//! ```sh
//! BINGO_WS_URL=wss://bingo.example.com/ws \
//! BINGO_API_URL=https://bingo.example.com \
//! BINGO_TOKEN=... BINGO_ROOM_ID=42 \
//! cargo run --example watch_room
//! ```

use bingo_round_sync::{
    ConnectionState, EventKind, HttpRoomApi, SessionConfig, SyncEvent, SyncSession,
    WebSocketConnector,
};

/// Default endpoints when the environment does not override them.
const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Card used for the automatic claim.
const DEMO_CARD_ID: u64 = 1;
const DEMO_CARD: [&str; 5] = ["B-1", "I-16", "N-31", "G-46", "O-61"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=bingo_round_sync=debug` for engine internals.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let ws_url = std::env::var("BINGO_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let api_url = std::env::var("BINGO_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let token = std::env::var("BINGO_TOKEN").ok();
    let room_id: u64 = std::env::var("BINGO_ROOM_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()?;

    let mut connector = WebSocketConnector::new(ws_url.clone());
    let mut api = HttpRoomApi::new(api_url);
    if let Some(token) = token {
        connector = connector.with_token(token.clone());
        api = api.with_token(token);
    }

    tracing::info!(room_id, url = %ws_url, "opening session");
    let (mut session, mut events) =
        SyncSession::open(connector, api, SessionConfig::new().with_room(room_id));

    // Listeners see raw server events; here, just the pattern announcements.
    let _pattern = session.listen("demo", EventKind::RoundStarting, |event| {
        tracing::info!("next round announced: {event:?}");
    });
    let _states = session.on_state_change(|state| {
        if state == ConnectionState::Reconnecting {
            tracing::warn!("connection lost, reconnecting…");
        }
    });

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("event channel closed, exiting");
                    break;
                };

                match event {
                    SyncEvent::ConnectionChanged(state) => {
                        tracing::info!("connection → {state:?}");
                    }
                    SyncEvent::Reconciled { reason, round_number, phase } => {
                        tracing::info!("reconciled ({reason:?}): round {round_number}, {phase:?}");
                    }
                    SyncEvent::RoundAdvanced { from, to } => {
                        tracing::info!("round {from} → {to}");
                    }
                    SyncEvent::PhaseChanged { round_number, to, .. } => {
                        tracing::info!("round {round_number} is now {to:?}");
                    }
                    SyncEvent::NumberCalled { number, .. } => {
                        let view = session.current();
                        let recent: Vec<&str> =
                            view.recent_numbers.iter().map(|n| n.value.as_str()).collect();
                        tracing::info!("called {} (recent: {})", number.value, recent.join(" "));

                        if DEMO_CARD.iter().all(|v| view.is_called(v)) && !view.won_this_round {
                            let marked = DEMO_CARD.iter().map(|v| (*v).to_string()).collect();
                            let outcome = session.submit_claim(DEMO_CARD_ID, marked).await?;
                            tracing::info!("claim outcome: {outcome:?}");
                        }
                    }
                    SyncEvent::CountdownTick(seconds) => {
                        tracing::debug!("countdowns: {seconds:?}");
                    }
                    SyncEvent::WinAsserted { card_id, player_name, .. } => {
                        tracing::info!(
                            "bingo! card {card_id} by {}",
                            player_name.as_deref().unwrap_or("someone")
                        );
                    }
                    SyncEvent::SyncFault { reason } => {
                        tracing::error!("out of sync: {reason}");
                    }
                    SyncEvent::RoomFinished { winners } | SyncEvent::WinnersUpdated(winners) => {
                        tracing::info!("room finished with {} winner(s)", winners.len());
                    }
                    SyncEvent::AuthFault { reason } => {
                        tracing::error!("authentication failed: {reason}");
                    }
                    SyncEvent::ConnectionLost { attempts } => {
                        tracing::error!("gave up after {attempts} attempts");
                        break;
                    }
                    SyncEvent::Closed { reason } => {
                        tracing::info!("session closed: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }
                    other => {
                        tracing::debug!("event: {other:?}");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.close().await;
    tracing::info!("session shut down. Goodbye!");
    Ok(())
}
