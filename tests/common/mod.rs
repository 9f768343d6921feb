#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for bingo round sync integration tests.
//!
//! Provides a channel-driven [`MockTransport`], a scripted [`MockConnector`],
//! an in-memory [`MockRoomApi`] and helpers for building server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bingo_round_sync::protocol::{
    CalledNumber, ClaimRequest, ClaimVerdictPayload, CountdownPayload, CountdownStoppedPayload,
    ErrorPayload, NumberCalledPayload, RoomFinishedPayload, RoomInfo, RoundCleanupPayload,
    RoundFinishedPayload, RoundSnapshot, RoundStartedPayload, RoundStartingPayload,
    RoundStatusChangedPayload, SnapshotRound, WinAssertedPayload, Winner,
};
use bingo_round_sync::{
    BingoSyncError, ClientMessage, Clock, Connector, ErrorCode, Phase, ReconnectPolicy,
    RoomApi, RoundView, ServerEvent, SessionConfig, SyncEvent, SystemClock, Transport,
};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch, Semaphore};

/// Upper bound for every wait in the integration tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub type Frame = Option<Result<String, BingoSyncError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// Frames pushed through the paired [`MockServer`] are returned by `recv()`
/// in order; everything the client sends is forwarded to the server side.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// The test's end of a [`MockTransport`].
pub struct MockServer {
    frames: mpsc::UnboundedSender<Frame>,
    sent: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn pair() -> (Self, MockServer) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: frames_rx,
            sent: sent_tx,
            closed: Arc::clone(&closed),
        };
        let server = MockServer {
            frames: frames_tx,
            sent: sent_rx,
            closed,
        };
        (transport, server)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BingoSyncError::TransportClosed);
        }
        let _ = self.sent.send(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
        match self.incoming.recv().await {
            Some(frame) => frame,
            // Server handle dropped: stay silent until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), BingoSyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    /// Push one server event.
    pub fn push(&self, event: &ServerEvent) {
        self.push_raw(event.encode().unwrap());
    }

    /// Push raw frame text.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.frames.send(Some(Ok(text.into())));
    }

    /// Simulate the server closing the connection.
    pub fn hang_up(&self) {
        let _ = self.frames.send(None);
    }

    /// Simulate a receive failure.
    pub fn fail(&self, err: BingoSyncError) {
        let _ = self.frames.send(Some(Err(err)));
    }

    /// Next message the client sent, decoded.
    pub async fn next_sent(&mut self) -> ClientMessage {
        let text = tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("client sent an undecodable frame")
    }

    /// Wait for the next `submit-claim` the client sends.
    pub async fn next_claim(&mut self) -> ClaimRequest {
        loop {
            if let ClientMessage::SubmitClaim(request) = self.next_sent().await {
                return request;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

enum ConnectStep {
    Accept(MockTransport),
    Refuse(BingoSyncError),
}

/// A connector that replays a script of accepted and refused attempts.
///
/// Once the script is exhausted every attempt is refused with a
/// connection-refused I/O error.
pub struct MockConnector {
    script: Arc<StdMutex<VecDeque<ConnectStep>>>,
    attempts: Arc<AtomicUsize>,
}

/// The test's handle for scripting a [`MockConnector`].
#[derive(Clone)]
pub struct ConnectorScript {
    script: Arc<StdMutex<VecDeque<ConnectStep>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, ConnectorScript) {
        let script = Arc::new(StdMutex::new(VecDeque::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            script: Arc::clone(&script),
            attempts: Arc::clone(&attempts),
        };
        (connector, ConnectorScript { script, attempts })
    }
}

impl ConnectorScript {
    /// Let the next attempt succeed; returns the server side of it.
    pub fn accept(&self) -> MockServer {
        let (transport, server) = MockTransport::pair();
        self.script
            .lock()
            .unwrap()
            .push_back(ConnectStep::Accept(transport));
        server
    }

    /// Make the next attempt fail with `err`.
    pub fn refuse(&self, err: BingoSyncError) {
        self.script
            .lock()
            .unwrap()
            .push_back(ConnectStep::Refuse(err));
    }

    /// Connect attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>, BingoSyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(ConnectStep::Accept(transport)) => Ok(Box::new(transport)),
            Some(ConnectStep::Refuse(err)) => Err(err),
            None => Err(BingoSyncError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "script exhausted",
            ))),
        }
    }
}

// ── MockRoomApi ─────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    snapshot: Option<RoundSnapshot>,
    winners: Vec<Winner>,
    snapshot_fetches: usize,
    winners_fetches: usize,
    unauthorized: bool,
    snapshot_gate: Option<Arc<Semaphore>>,
}

/// An in-memory [`RoomApi`].
///
/// Without a scripted snapshot, snapshot requests fail with a 503.
#[derive(Clone)]
pub struct MockRoomApi {
    state: Arc<StdMutex<ApiState>>,
    clock: Arc<dyn Clock>,
}

impl MockRoomApi {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Report server time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_snapshot(&self, snapshot: RoundSnapshot) {
        self.state.lock().unwrap().snapshot = Some(snapshot);
    }

    pub fn set_winners(&self, winners: Vec<Winner>) {
        self.state.lock().unwrap().winners = winners;
    }

    /// Answer every call with 401 from now on.
    pub fn revoke(&self) {
        self.state.lock().unwrap().unauthorized = true;
    }

    /// Hold every later snapshot response until the returned gate gets a
    /// permit. The response content is fixed when the request arrives.
    pub fn hold_snapshots(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().unwrap().snapshot_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn snapshot_fetches(&self) -> usize {
        self.state.lock().unwrap().snapshot_fetches
    }

    pub fn winners_fetches(&self) -> usize {
        self.state.lock().unwrap().winners_fetches
    }

    fn check_auth(&self) -> Result<(), BingoSyncError> {
        if self.state.lock().unwrap().unauthorized {
            return Err(BingoSyncError::Api {
                status: 401,
                message: "token revoked".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RoomApi for MockRoomApi {
    async fn fetch_room(&self, room_id: u64) -> Result<RoomInfo, BingoSyncError> {
        Err(BingoSyncError::Api {
            status: 404,
            message: format!("room {room_id} metadata not scripted"),
        })
    }

    async fn fetch_called_numbers(
        &self,
        _room_id: u64,
        _round: u32,
    ) -> Result<Vec<CalledNumber>, BingoSyncError> {
        Ok(Vec::new())
    }

    async fn fetch_winners(&self, _room_id: u64) -> Result<Vec<Winner>, BingoSyncError> {
        self.check_auth()?;
        let mut state = self.state.lock().unwrap();
        state.winners_fetches += 1;
        Ok(state.winners.clone())
    }

    async fn fetch_server_time(&self) -> Result<DateTime<Utc>, BingoSyncError> {
        Ok(self.clock.now())
    }

    async fn fetch_snapshot(&self, _room_id: u64) -> Result<RoundSnapshot, BingoSyncError> {
        self.check_auth()?;
        let (result, gate) = {
            let mut state = self.state.lock().unwrap();
            state.snapshot_fetches += 1;
            let result = state.snapshot.clone().ok_or(BingoSyncError::Api {
                status: 503,
                message: "snapshot not scripted".into(),
            });
            (result, state.snapshot_gate.clone())
        };
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        result
    }
}

// ── Session helpers ─────────────────────────────────────────────────

/// A config with fast retries, suitable for tests.
pub fn test_config(room_id: u64) -> SessionConfig {
    SessionConfig::new()
        .with_room(room_id)
        .with_reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: 3,
        })
        .with_connect_timeout(Duration::from_secs(1))
        .with_tick_interval(Duration::from_millis(10))
}

/// Receive events until one matches `pred`; panics on timeout.
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<SyncEvent>,
    mut pred: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the published view satisfies `pred`; panics on timeout.
pub async fn wait_for_view(
    view: &mut watch::Receiver<RoundView>,
    pred: impl FnMut(&RoundView) -> bool,
) -> RoundView {
    tokio::time::timeout(WAIT, view.wait_for(pred))
        .await
        .expect("timed out waiting for view")
        .expect("session dropped")
        .clone()
}

/// Drain events up to and including `Closed`.
pub async fn drain_until_closed(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            let done = matches!(event, SyncEvent::Closed { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for Closed");
    seen
}

// ── Frame builders ──────────────────────────────────────────────────

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
}

pub fn round_starting(round_number: u32, seconds: f64) -> ServerEvent {
    ServerEvent::RoundStarting(RoundStartingPayload {
        round_number,
        pattern: Some("line".into()),
        prize_amount: Some(25.0),
        seconds_remaining: Some(seconds),
        finish_at: None,
    })
}

pub fn round_started(round_number: u32) -> ServerEvent {
    ServerEvent::RoundStarted(RoundStartedPayload {
        round_number,
        pattern: None,
        prize_amount: None,
    })
}

pub fn number_called(round_number: u32, number: &str) -> ServerEvent {
    ServerEvent::NumberCalled(NumberCalledPayload {
        round_number,
        number: number.into(),
        called_at: None,
    })
}

pub fn status_changed(round_number: u32, status: Phase) -> ServerEvent {
    ServerEvent::RoundStatusChanged(RoundStatusChangedPayload {
        round_number,
        status,
    })
}

pub fn win_asserted(round_number: u32, card_id: u64) -> ServerEvent {
    ServerEvent::WinAsserted(WinAssertedPayload {
        round_number,
        card_id,
        player_id: Some(77),
        player_name: Some("rival".into()),
        first_claim: true,
    })
}

pub fn round_finished(round_number: u32) -> ServerEvent {
    ServerEvent::RoundFinished(RoundFinishedPayload {
        round_number,
        winners: Vec::new(),
    })
}

pub fn round_cleanup(round_number: u32) -> ServerEvent {
    ServerEvent::RoundCleanup(RoundCleanupPayload { round_number })
}

pub fn room_finished(winners: Option<Vec<Winner>>) -> ServerEvent {
    ServerEvent::RoomFinished(RoomFinishedPayload { winners })
}

pub fn bingo_claim_countdown(round_number: u32, seconds: f64) -> ServerEvent {
    ServerEvent::BingoClaimCountdown(CountdownPayload {
        round_number: Some(round_number),
        seconds_remaining: Some(seconds),
        finish_at: None,
    })
}

pub fn transition_countdown_until(round_number: u32, finish_at: DateTime<Utc>) -> ServerEvent {
    ServerEvent::RoundTransitionCountdown(CountdownPayload {
        round_number: Some(round_number),
        seconds_remaining: None,
        finish_at: Some(finish_at),
    })
}

pub fn countdown_stopped(round_number: u32) -> ServerEvent {
    ServerEvent::RoundCountdownStopped(CountdownStoppedPayload {
        round_number: Some(round_number),
        kind: None,
    })
}

pub fn server_error(message: &str, code: Option<ErrorCode>) -> ServerEvent {
    ServerEvent::Error(ErrorPayload {
        message: message.into(),
        code,
    })
}

pub fn verdict(request: &ClaimRequest, accepted: bool, code: Option<ErrorCode>) -> ServerEvent {
    ServerEvent::ClaimVerdict(ClaimVerdictPayload {
        request_id: request.request_id,
        round_number: request.round_number,
        card_id: request.card_id,
        accepted,
        code,
        message: None,
    })
}

pub fn winner(player_id: u64, card_id: u64, round_number: u32) -> Winner {
    Winner {
        player_id,
        player_name: Some(format!("player-{player_id}")),
        card_id,
        round_number,
        prize_amount: 10.0,
    }
}

/// A snapshot of `room_id` with `round_number` in `phase` and `numbers` called.
pub fn snapshot(room_id: u64, round_number: u32, phase: Phase, numbers: &[&str]) -> RoundSnapshot {
    let called_numbers: Vec<CalledNumber> = numbers
        .iter()
        .enumerate()
        .map(|(i, value)| CalledNumber {
            value: (*value).into(),
            called_at: at(i as i64),
        })
        .collect();
    RoundSnapshot {
        room_id: Some(room_id),
        room_status: bingo_round_sync::protocol::RoomStatus::Active,
        round: Some(SnapshotRound {
            number: round_number,
            phase,
            pattern: Some("line".into()),
            prize_amount: 25.0,
            last_called_at: called_numbers.last().map(|n| n.called_at),
            called_numbers,
        }),
        countdowns: Vec::new(),
        winners: None,
    }
}

/// Values of the called numbers, in call order.
pub fn values(view: &RoundView) -> Vec<String> {
    view.called_numbers.iter().map(|n| n.value.clone()).collect()
}
