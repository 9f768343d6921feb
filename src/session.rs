//! The round synchronization session.
//!
//! [`SyncSession`] is a thin handle around a background engine task. The
//! engine owns every component (connection manager, round state store,
//! countdowns, claim orchestrator, reset coordinator, snapshot reconciler)
//! and is the only thing that mutates them; the rendering layer reads a
//! [`RoundView`] from a `watch` channel and receives [`SyncEvent`]s on a
//! bounded channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("wss://bingo.example.com/ws").with_token(token);
//! let api = HttpRoomApi::new("https://bingo.example.com").with_token(token);
//! let (session, mut events) = SyncSession::open(connector, api, SessionConfig::new().with_room(42));
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SyncEvent::NumberCalled { number, .. } => println!("{}", number.value),
//!         SyncEvent::Closed { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::RoomApi;
use crate::claim::{ClaimOrchestrator, ClaimOutcome, ClaimRejection};
use crate::clock::{Clock, ServerClockOffset, SystemClock};
use crate::connection::{
    ConnectFailure, ConnectionManager, ConnectionState, ReconnectPolicy, StateObservers,
    StateSubscription,
};
use crate::countdown::{self, ceil_seconds, Countdowns};
use crate::error::{BingoSyncError, Result};
use crate::event::SyncEvent;
use crate::listeners::{self, ListenerHandle, ListenerRegistry, SubscriberId};
use crate::protocol::{
    CalledNumber, CardId, ClientMessage, CountdownKind, CountdownPayload, EventKind, PatternId,
    Phase, RoomId, RoomStatus, RoundNumber, RoundSnapshot, ServerEvent, Winner,
};
use crate::reset::{ResetCoordinator, ResetDecision};
use crate::round::{Admission, RoundStateStore, StoreChange, DEFAULT_RECENT_NUMBERS_LEN};
use crate::snapshot::{ReconcileReason, SnapshotReconciler, SnapshotSeq};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for one connect attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default countdown tick cadence.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Default time to wait for a claim verdict.
const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before retrying a queued reset.
const DEFAULT_RESET_RETRY_DELAY: Duration = Duration::from_millis(25);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SyncSession`].
///
/// # Example
///
/// ```
/// use bingo_round_sync::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_room(42)
///     .with_tick_interval(Duration::from_millis(100));
/// assert_eq!(config.room_id, Some(42));
/// assert_eq!(config.event_channel_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Room to join as soon as the session opens.
    pub room_id: Option<RoomId>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning
    /// rather than stalling the engine. `Closed` is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`SyncSession::close`] waits for the engine before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Upper bound on a single connect attempt. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Backoff between automatic reconnect attempts.
    pub reconnect: ReconnectPolicy,
    /// Countdown tick cadence while a window is active. Defaults to **50 ms**.
    pub tick_interval: Duration,
    /// Length of the recent-numbers view. Defaults to **3**.
    pub recent_numbers_len: usize,
    /// How long to wait for a claim verdict before reporting a transport
    /// failure. Defaults to **10 seconds**.
    pub claim_timeout: Duration,
    /// Delay before retrying a reset that had to wait. Defaults to **25 ms**.
    pub reset_retry_delay: Duration,
    /// Re-measure the server clock offset after every reconnect.
    /// Defaults to **true**.
    pub sync_clock_on_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            recent_numbers_len: DEFAULT_RECENT_NUMBERS_LEN,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            reset_retry_delay: DEFAULT_RESET_RETRY_DELAY,
            sync_clock_on_reconnect: true,
        }
    }
}

impl SessionConfig {
    /// A configuration with every default and no room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `room_id` as soon as the session opens.
    #[must_use]
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_recent_numbers_len(mut self, len: usize) -> Self {
        self.recent_numbers_len = len.max(1);
        self
    }

    #[must_use]
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reset_retry_delay(mut self, delay: Duration) -> Self {
        self.reset_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_sync_clock_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_clock_on_reconnect = enabled;
        self
    }
}

// ── Read-only view ──────────────────────────────────────────────────

/// Everything the rendering layer needs, as a read-only copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundView {
    pub room_id: Option<RoomId>,
    pub room_status: RoomStatus,
    pub round_number: RoundNumber,
    pub phase: Phase,
    pub pattern: Option<PatternId>,
    pub prize_amount: f64,
    pub called_numbers: Vec<CalledNumber>,
    /// Newest first.
    pub recent_numbers: Vec<CalledNumber>,
    pub last_called_at: Option<DateTime<Utc>>,
    /// Whole seconds left per active countdown.
    pub countdowns: BTreeMap<CountdownKind, u64>,
    pub claimed_cards: Vec<CardId>,
    pub won_this_round: bool,
    pub claim_in_flight: bool,
    /// Outcome of the latest claim this round; drives the claim notice.
    pub last_claim: Option<ClaimOutcome>,
    pub winners: Vec<Winner>,
    pub connection: ConnectionState,
    pub sync_fault: Option<String>,
    pub auth_fault: Option<String>,
    pub clock_offset: ServerClockOffset,
}

impl RoundView {
    /// Time elapsed since the last called number, in server time.
    pub fn since_last_call(&self, server_now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_called_at
            .map(|at| (server_now - at).max(chrono::Duration::zero()))
    }

    /// Returns `true` if `value` has been called this round.
    pub fn is_called(&self, value: &str) -> bool {
        self.called_numbers.iter().any(|n| n.value == value)
    }
}

// ── Session handle ──────────────────────────────────────────────────

enum Command {
    JoinRoom(RoomId),
    LeaveRoom,
    SubmitClaim {
        card_id: CardId,
        marked_numbers: Vec<String>,
        reply: oneshot::Sender<ClaimOutcome>,
    },
    ResetForRound {
        round: RoundNumber,
        reply: oneshot::Sender<ResetDecision>,
    },
    Reconnect,
    Disconnect,
}

/// Handle to a running round synchronization engine.
///
/// Created via [`SyncSession::open`]. Dropping the handle aborts the engine
/// and detaches every listener immediately.
pub struct SyncSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<RoundView>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    observers: StateObservers,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SyncSession {
    /// Start the engine and return a handle plus the event receiver.
    ///
    /// The engine measures the server clock offset, connects, and joins
    /// [`SessionConfig::room_id`] if one is set.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn open<C, A>(connector: C, api: A, config: SessionConfig) -> (Self, mpsc::Receiver<SyncEvent>)
    where
        C: Connector,
        A: RoomApi,
    {
        Self::open_with_clock(connector, api, Arc::new(SystemClock), config)
    }

    /// Like [`open`](Self::open), with an explicit local clock.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn open_with_clock<C, A>(
        connector: C,
        api: A,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>)
    where
        C: Connector,
        A: RoomApi,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (view_tx, view_rx) = watch::channel(RoundView::default());

        let listeners = Arc::new(Mutex::new(ListenerRegistry::new()));
        let observers = StateObservers::default();
        let shutdown_timeout = config.shutdown_timeout;

        let engine = Engine {
            connector,
            api: Arc::new(api),
            clock,
            transport: None,
            conn: ConnectionManager::new(config.reconnect, observers.clone()),
            last_conn_state: ConnectionState::Disconnected,
            store: RoundStateStore::new(config.recent_numbers_len),
            countdowns: Countdowns::new(),
            last_tick: BTreeMap::new(),
            claims: ClaimOrchestrator::new(),
            claim_reply: None,
            claim_deadline: None,
            last_claim: None,
            resets: ResetCoordinator::new(),
            reset_retry: None,
            reconciler: SnapshotReconciler::new(),
            offset: ServerClockOffset::default(),
            room_id: None,
            retry_at: None,
            has_connected: false,
            winners_requested: false,
            sync_fault: None,
            auth_fault: None,
            stop: None,
            tasks: JoinSet::new(),
            listeners: Arc::clone(&listeners),
            event_tx,
            view_tx,
            config,
        };
        let task = tokio::spawn(engine.run(cmd_rx, shutdown_rx));

        let session = Self {
            cmd_tx,
            view_rx,
            listeners,
            observers,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };
        (session, event_rx)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Subscribe to `room_id`, leaving any current room first. Queued until
    /// connected if the connection is down.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub fn join_room(&self, room_id: RoomId) -> Result<()> {
        self.send(Command::JoinRoom(room_id))
    }

    /// Leave the current room and reset all round state.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub fn leave_room(&self) -> Result<()> {
        self.send(Command::LeaveRoom)
    }

    /// Assert that `card_id` wins the current round.
    ///
    /// Every outcome, including local and server rejections, is an `Ok`
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub async fn submit_claim(
        &self,
        card_id: CardId,
        marked_numbers: Vec<String>,
    ) -> Result<ClaimOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitClaim {
            card_id,
            marked_numbers,
            reply,
        })?;
        rx.await.map_err(|_| BingoSyncError::SessionClosed)
    }

    /// Reset all per-round state for `round`.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub async fn reset_for_round(&self, round: RoundNumber) -> Result<ResetDecision> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ResetForRound { round, reply })?;
        rx.await.map_err(|_| BingoSyncError::SessionClosed)
    }

    /// Drop the current connection (if any) and connect again with a fresh
    /// attempt budget.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    /// Close the connection without stopping the session.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::SessionClosed`] if the engine has stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    // ── Listeners ───────────────────────────────────────────────────

    /// Attach `handler` to inbound events of `kind`, replacing whatever
    /// `subscriber` had registered for that kind.
    pub fn listen(
        &self,
        subscriber: impl Into<SubscriberId>,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(subscriber, kind, Arc::new(handler))
    }

    /// Detach a listener. Returns `false` if it was already replaced.
    pub fn unlisten(&self, handle: ListenerHandle) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deregister(handle)
    }

    /// Detach every listener owned by `subscriber`.
    pub fn unlisten_all(&self, subscriber: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deregister_subscriber(subscriber)
    }

    /// Run `callback` on every connection state transition.
    pub fn on_state_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> StateSubscription {
        self.observers.subscribe(callback)
    }

    // ── State ───────────────────────────────────────────────────────

    /// A receiver that always holds the latest [`RoundView`].
    pub fn view(&self) -> watch::Receiver<RoundView> {
        self.view_rx.clone()
    }

    /// A copy of the current [`RoundView`].
    pub fn current(&self) -> RoundView {
        self.view_rx.borrow().clone()
    }

    /// Returns `true` while the engine task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the session: detach listeners, close the transport and wait for
    /// the engine to exit.
    ///
    /// Listeners and state callbacks are detached before this method first
    /// yields, so none fire afterwards.
    pub async fn close(&mut self) {
        debug!("SyncSession: close requested");
        self.detach();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("engine terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("engine did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("engine aborted: {join_err}");
                    }
                }
            }
        }
    }

    fn detach(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.observers.clear();
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| BingoSyncError::SessionClosed)
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.view_rx.borrow();
        f.debug_struct("SyncSession")
            .field("room_id", &view.room_id)
            .field("round_number", &view.round_number)
            .field("phase", &view.phase)
            .field("connection", &view.connection)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        // No executor to drive a graceful close here. Detach synchronously
        // and abort; the engine future (and its REST tasks) are dropped.
        self.detach();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

enum TaskResult {
    Snapshot {
        seq: SnapshotSeq,
        room_id: RoomId,
        reason: ReconcileReason,
        result: Result<RoundSnapshot>,
    },
    Winners {
        room_id: RoomId,
        result: Result<Vec<Winner>>,
    },
    ClockOffset(Result<ServerClockOffset>),
}

struct Engine<C, A> {
    connector: C,
    api: Arc<A>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,

    conn: ConnectionManager,
    last_conn_state: ConnectionState,
    store: RoundStateStore,
    countdowns: Countdowns,
    last_tick: BTreeMap<CountdownKind, u64>,
    claims: ClaimOrchestrator,
    claim_reply: Option<oneshot::Sender<ClaimOutcome>>,
    claim_deadline: Option<Instant>,
    last_claim: Option<ClaimOutcome>,
    resets: ResetCoordinator,
    reset_retry: Option<(Instant, RoundNumber)>,
    reconciler: SnapshotReconciler,
    offset: ServerClockOffset,

    room_id: Option<RoomId>,
    retry_at: Option<Instant>,
    has_connected: bool,
    winners_requested: bool,
    sync_fault: Option<String>,
    auth_fault: Option<String>,
    stop: Option<String>,

    tasks: JoinSet<TaskResult>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    event_tx: mpsc::Sender<SyncEvent>,
    view_tx: watch::Sender<RoundView>,
}

impl<C: Connector, A: RoomApi> Engine<C, A> {
    /// Multiplexes commands, inbound frames, timers and REST completions via
    /// `tokio::select!`.
    ///
    /// Exits when:
    /// - shutdown is signalled or the session handle is dropped
    /// - the server refuses the credential
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("engine started");
        self.initial_clock_sync().await;
        self.connect().await;
        if let Some(room_id) = self.config.room_id.filter(|_| self.stop.is_none()) {
            self.join_room(room_id).await;
        }
        self.publish_view();

        let mut ticker = countdown::ticker(self.config.tick_interval);

        while self.stop.is_none() {
            let ticking = self.countdowns.is_active();
            let reset_at = self.reset_retry.map(|(at, _)| at);

            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.stop = Some("session closed".into());
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("command channel closed, stopping engine");
                        self.stop = Some("session handle dropped".into());
                    }
                },

                incoming = recv_from(&mut self.transport) => {
                    self.handle_incoming(incoming).await;
                }

                () = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.connect().await;
                }

                _ = ticker.tick(), if ticking => self.tick(),

                () = sleep_until(self.claim_deadline) => {
                    self.claim_deadline = None;
                    if let Some(outcome) = self.claims.transport_failed("no verdict before timeout") {
                        self.finish_claim(outcome, None);
                    }
                }

                () = sleep_until(reset_at) => {
                    if let Some((_, round)) = self.reset_retry.take() {
                        self.reset_for_round(round);
                    }
                }

                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => match done {
                    Ok(result) => self.handle_task(result).await,
                    Err(join_err) => warn!("background request failed: {join_err}"),
                },
            }

            self.note_connection();
            self.publish_view();
        }

        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
        let reason = self.stop.take();
        info!(reason = reason.as_deref().unwrap_or("unknown"), "engine stopped");
        if self.event_tx.send(SyncEvent::Closed { reason }).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::JoinRoom(room_id) => self.join_room(room_id).await,
            Command::LeaveRoom => self.leave_room().await,
            Command::SubmitClaim {
                card_id,
                marked_numbers,
                reply,
            } => self.submit_claim(card_id, marked_numbers, reply).await,
            Command::ResetForRound { round, reply } => {
                let decision = self.reset_for_round(round);
                let _ = reply.send(decision);
            }
            Command::Reconnect => {
                info!("manual reconnect");
                self.drop_transport().await;
                self.fail_in_flight_claim("reconnecting");
                self.retry_at = None;
                self.conn.manual_reconnect();
                self.connect().await;
            }
            Command::Disconnect => {
                info!("disconnect requested");
                self.drop_transport().await;
                self.retry_at = None;
                self.conn.disconnect();
                self.fail_in_flight_claim("disconnected");
            }
        }
    }

    async fn join_room(&mut self, room_id: RoomId) {
        if self.room_id == Some(room_id) {
            debug!(room_id, "already in room");
            return;
        }
        if self.room_id.is_some() {
            self.leave_room().await;
        }
        info!(room_id, "joining room");
        self.room_id = Some(room_id);
        if let Some(msg) = self.conn.subscribe(room_id) {
            self.send_or_drop(msg).await;
        }
        self.request_snapshot(room_id, ReconcileReason::Join);
    }

    async fn leave_room(&mut self) {
        let Some(room_id) = self.room_id.take() else {
            debug!("leave requested without a room");
            return;
        };
        info!(room_id, "leaving room");
        if let Some(msg) = self.conn.unsubscribe(room_id) {
            self.send_or_drop(msg).await;
        }
        self.reconciler.cancel();
        self.store = RoundStateStore::new(self.config.recent_numbers_len);
        self.countdowns.clear_all();
        self.last_tick.clear();
        self.claims.reset_for_round();
        self.last_claim = None;
        self.resets.clear();
        self.reset_retry = None;
        self.winners_requested = false;
        self.sync_fault = None;
    }

    async fn submit_claim(
        &mut self,
        card_id: CardId,
        marked_numbers: Vec<String>,
        reply: oneshot::Sender<ClaimOutcome>,
    ) {
        let Some(room_id) = self.room_id else {
            let outcome = ClaimOutcome::Rejected {
                cause: ClaimRejection::RoundNotClaimable,
                local: true,
            };
            let _ = reply.send(outcome);
            return;
        };
        if let Err(outcome) = self.claims.precheck(card_id, &marked_numbers, &self.store) {
            self.finish_claim(outcome, Some(reply));
            return;
        }
        if self.transport.is_none() || !self.conn.is_connected() {
            let outcome = ClaimOutcome::TransportFailed {
                reason: "not connected".into(),
            };
            self.finish_claim(outcome, Some(reply));
            return;
        }
        let now = self.clock.now();
        let request = match self
            .claims
            .begin(room_id, card_id, marked_numbers, &self.store, now)
        {
            Ok(request) => request,
            Err(outcome) => {
                self.finish_claim(outcome, Some(reply));
                return;
            }
        };
        self.claim_reply = Some(reply);
        self.claim_deadline = Some(Instant::now() + self.config.claim_timeout);
        if let Err(e) = self.send(ClientMessage::SubmitClaim(request)).await {
            error!("claim send failed: {e}");
            self.connection_lost(format!("transport send error: {e}")).await;
        }
    }

    // ── Connection ──────────────────────────────────────────────────

    async fn connect(&mut self) {
        self.conn.begin_connect();
        self.note_connection();

        let attempt =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect()).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(BingoSyncError::Timeout),
        };

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                let reconnect = self.has_connected;
                self.has_connected = true;
                let flush = self.conn.connected();
                info!(reconnect, queued = flush.len(), "connected");
                self.note_connection();

                let mut pending = flush.into_iter();
                while let Some(msg) = pending.next() {
                    if let Err(e) = self.send(msg.clone()).await {
                        error!("flush failed: {e}");
                        let mut rest = vec![msg];
                        rest.extend(pending);
                        self.conn.requeue(rest);
                        self.connection_lost(format!("transport send error: {e}")).await;
                        return;
                    }
                }

                if reconnect {
                    if let Some(room_id) = self.room_id {
                        self.request_snapshot(room_id, ReconcileReason::Reconnect);
                    }
                    if self.config.sync_clock_on_reconnect {
                        self.spawn_clock_sync();
                    }
                }
            }
            Err(e) => {
                let decision = self.conn.connect_failed(&e);
                self.handle_failure_decision(decision, &e.to_string());
            }
        }
    }

    async fn connection_lost(&mut self, reason: String) {
        self.drop_transport().await;
        self.fail_in_flight_claim(&reason);
        let decision = self.conn.dropped();
        self.handle_failure_decision(decision, &reason);
    }

    fn handle_failure_decision(&mut self, decision: ConnectFailure, reason: &str) {
        match decision {
            ConnectFailure::Retry(delay) => {
                self.retry_at = Some(Instant::now() + delay);
            }
            ConnectFailure::GiveUp => {
                self.retry_at = None;
                self.emit(SyncEvent::ConnectionLost {
                    attempts: self.conn.attempts(),
                });
            }
            ConnectFailure::Teardown => self.auth_teardown(reason.to_string()),
        }
        self.note_connection();
    }

    async fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("transport close failed: {e}");
            }
        }
    }

    /// Credential refused: stop everything. Fatal for the session.
    fn auth_teardown(&mut self, reason: String) {
        warn!(%reason, "authentication refused, tearing session down");
        self.conn.teardown();
        self.retry_at = None;
        self.room_id = None;
        self.reconciler.cancel();
        self.countdowns.clear_all();
        self.tasks.abort_all();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.fail_in_flight_claim("unauthorized");
        self.auth_fault = Some(reason.clone());
        self.emit(SyncEvent::AuthFault {
            reason: reason.clone(),
        });
        self.stop = Some(format!("unauthorized: {reason}"));
    }

    async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(BingoSyncError::NotConnected);
        };
        let json = serde_json::to_string(&msg)?;
        transport.send(json).await
    }

    async fn send_or_drop(&mut self, msg: ClientMessage) {
        if let Err(e) = self.send(msg).await {
            error!("transport send error: {e}");
            self.connection_lost(format!("transport send error: {e}"))
                .await;
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    async fn handle_incoming(&mut self, incoming: Option<Result<String>>) {
        match incoming {
            Some(Ok(text)) => match ServerEvent::decode(&text) {
                Ok(event) => self.handle_event(event),
                Err(e) => warn!("dropping malformed frame: {e}"),
            },
            Some(Err(e)) if e.is_auth() => {
                self.drop_transport().await;
                self.auth_teardown(e.to_string());
            }
            Some(Err(e)) => {
                error!("transport receive error: {e}");
                self.connection_lost(format!("transport receive error: {e}"))
                    .await;
            }
            None => {
                info!("transport closed by server");
                self.connection_lost("connection closed by server".into())
                    .await;
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match &event {
            ServerEvent::Error(p) => {
                if p.code.is_some_and(|code| code.is_auth()) {
                    self.auth_teardown(p.message.clone());
                } else {
                    warn!(code = ?p.code, message = %p.message, "server error");
                }
                return;
            }
            ServerEvent::ClaimVerdict(p) => {
                let awaited = self.claims.is_awaiting(p.request_id);
                if let Some(outcome) = self.claims.resolve(p, self.store.number()) {
                    if let ClaimOutcome::Accepted { round_number, .. } = outcome {
                        let from = self.store.phase();
                        if self.store.nudge_claim_window(round_number) {
                            self.emit(SyncEvent::PhaseChanged {
                                round_number,
                                from,
                                to: Phase::BingoClaimWindow,
                            });
                        }
                    }
                    if awaited {
                        self.finish_claim(outcome, None);
                    } else {
                        // The caller already got its answer; just record the verdict.
                        self.last_claim = Some(outcome.clone());
                        self.emit(SyncEvent::ClaimResolved(outcome));
                    }
                }
                self.dispatch(&event);
                return;
            }
            ServerEvent::RoomStateSync(snapshot) => {
                if let Some(room_id) = self.room_id {
                    if SnapshotReconciler::is_foreign(snapshot, room_id) {
                        debug!(room_id, "ignoring snapshot for another room");
                        return;
                    }
                    let seq = self.reconciler.issue(room_id, ReconcileReason::Pushed);
                    if self.reconciler.accept(seq, room_id) {
                        self.apply_snapshot(snapshot, ReconcileReason::Pushed);
                    }
                }
                self.dispatch(&event);
                return;
            }
            _ => {}
        }

        match self.store.admit(&event) {
            Admission::Stale { current, got } => {
                debug!(current, got, event = event.kind().as_str(), "dropping stale event");
                return;
            }
            Admission::RoomClosed => {
                debug!(event = event.kind().as_str(), "room finished, ignoring event");
                return;
            }
            Admission::Advance { to, .. } => {
                self.reset_for_round(to);
            }
            Admission::Current | Admission::Unscoped => {}
        }

        let round_before = self.store.number();
        let changes = self.store.apply(&event, self.server_now());
        self.emit_changes(round_before, changes);
        self.apply_countdowns(&event);

        match &event {
            ServerEvent::WinAsserted(p) => self.emit(SyncEvent::WinAsserted {
                round_number: p.round_number,
                card_id: p.card_id,
                player_id: p.player_id,
                player_name: p.player_name.clone(),
            }),
            ServerEvent::RoundCleanup(p) => {
                self.reset_for_round(p.round_number.saturating_add(1));
            }
            _ => {}
        }

        self.dispatch(&event);
    }

    fn apply_countdowns(&mut self, event: &ServerEvent) {
        let server_now = self.server_now();
        let set = |kind: CountdownKind, payload: &CountdownPayload, this: &mut Countdowns| {
            if let Some(finish_at) = payload.deadline(server_now) {
                this.set_window(kind, finish_at, payload.round_number);
            }
        };
        match event {
            ServerEvent::RoundStarting(p) => {
                set(CountdownKind::RoundStart, &p.countdown(), &mut self.countdowns);
            }
            ServerEvent::RoundStartCountdown(p) => {
                set(CountdownKind::RoundStart, p, &mut self.countdowns);
            }
            ServerEvent::RoundTransitionCountdown(p) => {
                set(CountdownKind::RoundTransition, p, &mut self.countdowns);
            }
            ServerEvent::BingoClaimCountdown(p) => {
                set(CountdownKind::BingoClaim, p, &mut self.countdowns);
            }
            ServerEvent::RoomStartCountdown(p) => {
                set(CountdownKind::RoomStart, p, &mut self.countdowns);
            }
            ServerEvent::RoundCountdownStopped(p) => {
                self.countdowns
                    .clear_window(p.kind.unwrap_or(CountdownKind::RoundStart));
            }
            ServerEvent::RoundStarted(_) => {
                self.countdowns.clear_window(CountdownKind::RoundStart);
            }
            ServerEvent::RoundFinished(_) => {
                self.countdowns.clear_window(CountdownKind::BingoClaim);
            }
            ServerEvent::RoomPending(_) => {
                self.countdowns.clear_window(CountdownKind::RoomStart);
            }
            ServerEvent::RoomFinished(_) => self.countdowns.clear_all(),
            ServerEvent::RoomStatusUpdated(p) if p.status == RoomStatus::Finished => {
                self.countdowns.clear_all();
            }
            _ => {}
        }
    }

    fn emit_changes(&mut self, round_number: RoundNumber, changes: Vec<StoreChange>) {
        for change in changes {
            match change {
                StoreChange::PhaseChanged { from, to } => {
                    if to == Phase::RoomFinished {
                        self.room_finished();
                    } else {
                        info!(round_number, ?from, ?to, "phase changed");
                        self.emit(SyncEvent::PhaseChanged {
                            round_number: self.store.number(),
                            from,
                            to,
                        });
                    }
                }
                StoreChange::NumberCalled(number) => {
                    debug!(round_number, number = %number.value, "number called");
                    self.emit(SyncEvent::NumberCalled {
                        round_number: self.store.number(),
                        number,
                    });
                }
                StoreChange::WinnersUpdated if self.store.is_room_finished() => {
                    self.emit(SyncEvent::WinnersUpdated(self.store.winners().to_vec()));
                }
                StoreChange::WinnersUpdated
                | StoreChange::RoundDetails
                | StoreChange::RoomStatus(_) => {}
            }
        }
    }

    fn room_finished(&mut self) {
        info!(room_id = ?self.room_id, "room finished");
        self.countdowns.clear_all();
        let winners = self.store.winners().to_vec();
        if winners.is_empty() && !self.winners_requested {
            if let Some(room_id) = self.room_id {
                self.winners_requested = true;
                let api = Arc::clone(&self.api);
                self.tasks.spawn(async move {
                    let result = api.fetch_winners(room_id).await;
                    TaskResult::Winners { room_id, result }
                });
            }
        }
        self.emit(SyncEvent::RoomFinished { winners });
    }

    fn dispatch(&self, event: &ServerEvent) {
        let handlers = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers_for(event.kind());
        listeners::dispatch(&handlers, event);
    }

    // ── Reset ───────────────────────────────────────────────────────

    fn reset_for_round(&mut self, round: RoundNumber) -> ResetDecision {
        if round < self.store.number() {
            debug!(round, current = self.store.number(), "ignoring reset for an older round");
            return ResetDecision::AlreadyDone;
        }
        let decision = self.resets.begin(round);
        match decision {
            ResetDecision::Run => {
                let from = self.store.number();
                self.store.begin_round(round);
                self.countdowns.clear_all();
                self.last_tick.clear();
                self.claims.reset_for_round();
                self.last_claim = None;
                if round > from {
                    info!(from, to = round, "round advanced");
                    self.emit(SyncEvent::RoundAdvanced { from, to: round });
                } else {
                    debug!(round, "round reset");
                }
                if let Some(next) = self.resets.finish() {
                    self.schedule_reset(next);
                }
            }
            ResetDecision::Queued => self.schedule_reset(round),
            ResetDecision::AlreadyDone => {}
        }
        decision
    }

    fn schedule_reset(&mut self, round: RoundNumber) {
        self.reset_retry = Some((Instant::now() + self.config.reset_retry_delay, round));
    }

    // ── Snapshots ───────────────────────────────────────────────────

    fn request_snapshot(&mut self, room_id: RoomId, reason: ReconcileReason) {
        let seq = self.reconciler.issue(room_id, reason);
        let api = Arc::clone(&self.api);
        self.tasks.spawn(async move {
            let result = api.fetch_snapshot(room_id).await;
            TaskResult::Snapshot {
                seq,
                room_id,
                reason,
                result,
            }
        });
    }

    fn apply_snapshot(&mut self, snapshot: &RoundSnapshot, reason: ReconcileReason) {
        let current = self.store.number();
        if self.store.is_room_finished() {
            // Only winners data still lands once the room is over.
            let changes = self.store.apply_snapshot(snapshot);
            self.emit_changes(current, changes);
            self.emit(SyncEvent::Reconciled {
                reason,
                round_number: current,
                phase: self.store.phase(),
            });
            return;
        }
        if let Some(round) = &snapshot.round {
            if round.number < current {
                debug!(current, snapshot = round.number, "dropping stale snapshot");
                return;
            }
            if round.number > current {
                self.reset_for_round(round.number);
            }
        }

        let round_before = self.store.number();
        let changes = self.store.apply_snapshot(snapshot);
        self.emit_changes(round_before, changes);

        if !self.store.is_room_finished() {
            let round_number = snapshot.round.as_ref().map(|r| r.number);
            for countdown in &snapshot.countdowns {
                let scope = if countdown.kind.is_round_scoped() {
                    round_number
                } else {
                    None
                };
                self.countdowns
                    .set_window(countdown.kind, countdown.finish_at, scope);
            }
        }

        self.sync_fault = None;
        info!(
            ?reason,
            round = self.store.number(),
            phase = ?self.store.phase(),
            "reconciled from snapshot"
        );
        self.emit(SyncEvent::Reconciled {
            reason,
            round_number: self.store.number(),
            phase: self.store.phase(),
        });
    }

    // ── Background results ──────────────────────────────────────────

    async fn handle_task(&mut self, result: TaskResult) {
        match result {
            TaskResult::Snapshot {
                seq,
                room_id,
                reason,
                result,
            } => {
                if !self.reconciler.accept(seq, room_id) {
                    return;
                }
                match result {
                    Ok(snapshot) if SnapshotReconciler::is_foreign(&snapshot, room_id) => {
                        warn!(room_id, "snapshot endpoint returned another room");
                    }
                    Ok(snapshot) => self.apply_snapshot(&snapshot, reason),
                    Err(e) if e.is_auth() => {
                        self.drop_transport().await;
                        self.auth_teardown(e.to_string());
                    }
                    Err(e) => warn!(?reason, "snapshot fetch failed: {e}"),
                }
            }
            TaskResult::Winners { room_id, result } => {
                if self.room_id != Some(room_id) {
                    return;
                }
                match result {
                    Ok(winners) => {
                        self.store.set_winners(winners.clone());
                        self.emit(SyncEvent::WinnersUpdated(winners));
                    }
                    Err(e) => {
                        warn!("winners fetch failed: {e}");
                        self.winners_requested = false;
                    }
                }
            }
            TaskResult::ClockOffset(Ok(offset)) => {
                debug!(offset_millis = offset.offset_millis, "server clock offset measured");
                self.offset = offset;
            }
            TaskResult::ClockOffset(Err(e)) => warn!("server time fetch failed: {e}"),
        }
    }

    async fn initial_clock_sync(&mut self) {
        let requested_at = self.clock.now();
        match tokio::time::timeout(self.config.connect_timeout, self.api.fetch_server_time()).await
        {
            Ok(Ok(server_time)) => {
                self.offset =
                    ServerClockOffset::measure(requested_at, server_time, self.clock.now());
                debug!(offset_millis = self.offset.offset_millis, "server clock offset measured");
            }
            Ok(Err(e)) => warn!("server time fetch failed, assuming no offset: {e}"),
            Err(_) => warn!("server time fetch timed out, assuming no offset"),
        }
    }

    fn spawn_clock_sync(&mut self) {
        let api = Arc::clone(&self.api);
        let clock = Arc::clone(&self.clock);
        self.tasks.spawn(async move {
            let requested_at = clock.now();
            let result = api
                .fetch_server_time()
                .await
                .map(|server_time| ServerClockOffset::measure(requested_at, server_time, clock.now()));
            TaskResult::ClockOffset(result)
        });
    }

    // ── Claims ──────────────────────────────────────────────────────

    fn fail_in_flight_claim(&mut self, reason: &str) {
        if let Some(outcome) = self.claims.transport_failed(reason) {
            self.finish_claim(outcome, None);
        }
    }

    /// Record `outcome` and answer the caller: `reply` for local outcomes,
    /// the stored in-flight reply otherwise.
    fn finish_claim(&mut self, outcome: ClaimOutcome, reply: Option<oneshot::Sender<ClaimOutcome>>) {
        let reply = match reply {
            Some(reply) => Some(reply),
            None => {
                self.claim_deadline = None;
                self.claim_reply.take()
            }
        };
        if let ClaimOutcome::SyncMismatch { missing } = &outcome {
            let reason = format!(
                "marked numbers not called by the server: {}; please reload",
                missing.join(", ")
            );
            self.sync_fault = Some(reason.clone());
            self.emit(SyncEvent::SyncFault { reason });
        }
        if !matches!(outcome, ClaimOutcome::Superseded { .. }) {
            self.last_claim = Some(outcome.clone());
        }
        self.emit(SyncEvent::ClaimResolved(outcome.clone()));
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    // ── Timers and view ─────────────────────────────────────────────

    fn tick(&mut self) {
        let report = self.countdowns.tick(self.server_now());
        for kind in &report.expired {
            debug!(?kind, "countdown expired");
            self.emit(SyncEvent::CountdownExpired(*kind));
        }
        let seconds = report.seconds();
        if seconds != self.last_tick {
            self.last_tick = seconds.clone();
            self.emit(SyncEvent::CountdownTick(seconds));
        }
    }

    fn server_now(&self) -> DateTime<Utc> {
        self.offset.to_server(self.clock.now())
    }

    fn note_connection(&mut self) {
        let state = self.conn.state();
        if state != self.last_conn_state {
            self.last_conn_state = state;
            self.emit(SyncEvent::ConnectionChanged(state));
        }
    }

    fn build_view(&self) -> RoundView {
        let round = self.store.round();
        let server_now = self.server_now();
        let countdowns = CountdownKind::ALL
            .iter()
            .filter_map(|kind| {
                let window = self.countdowns.get(*kind)?;
                let left = window.remaining(server_now).to_std().ok()?;
                let secs = ceil_seconds(left);
                (secs > 0).then_some((*kind, secs))
            })
            .collect();
        RoundView {
            room_id: self.room_id,
            room_status: self.store.room_status(),
            round_number: round.number,
            phase: round.phase,
            pattern: round.pattern.clone(),
            prize_amount: round.prize_amount,
            called_numbers: round.called_numbers.clone(),
            recent_numbers: self.store.recent_numbers(),
            last_called_at: round.last_called_at,
            countdowns,
            claimed_cards: self.claims.claimed_cards(),
            won_this_round: self.claims.player_has_won(),
            claim_in_flight: self.claims.in_flight().is_some(),
            last_claim: self.last_claim.clone(),
            winners: self.store.winners().to_vec(),
            connection: self.conn.state(),
            sync_fault: self.sync_fault.clone(),
            auth_fault: self.auth_fault.clone(),
            clock_offset: self.offset,
        }
    }

    fn publish_view(&self) {
        let next = self.build_view();
        self.view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    /// Emit an event. If the channel is full, log a warning and drop the
    /// event to avoid blocking the engine.
    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

/// Receive from the live transport, or wait forever while there is none.
async fn recv_from(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleep until `deadline`, or forever if there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
