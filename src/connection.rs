//! Transport connection manager.
//!
//! A synchronous state machine for the session's single event-stream
//! connection. It decides *what* to do (send now, queue, retry after a delay,
//! give up, tear down); the session loop does the I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::BingoSyncError;
use crate::protocol::{ClientMessage, RoomId, RoomRef};

/// State of the session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries are exhausted or the credential was refused. Only a manual
    /// reconnect leaves this state.
    Error,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Failed attempts allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What to do after a connect attempt failed or the connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Try again after the delay.
    Retry(Duration),
    /// Attempts exhausted; state is now [`ConnectionState::Error`].
    GiveUp,
    /// The credential was refused; everything has been torn down.
    Teardown,
}

// ── State-change observers ──────────────────────────────────────────

type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    callbacks: Vec<(u64, StateCallback)>,
}

/// Shared list of connection-state callbacks.
#[derive(Clone, Default)]
pub struct StateObservers {
    inner: Arc<Mutex<ObserverList>>,
}

impl std::fmt::Debug for StateObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObservers").finish_non_exhaustive()
    }
}

impl StateObservers {
    /// Register `callback`; it runs on every state transition.
    pub fn subscribe(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> StateSubscription {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        list.next_id += 1;
        let id = list.next_id;
        list.callbacks.push((id, Arc::new(callback)));
        StateSubscription {
            id,
            observers: Arc::downgrade(&self.inner),
        }
    }

    /// Run every callback with `state`. Callbacks are invoked outside the lock.
    pub fn notify(&self, state: ConnectionState) {
        let callbacks: Vec<StateCallback> = {
            let list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            list.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(state);
        }
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by [`StateObservers::subscribe`]; removes the callback.
#[derive(Debug)]
#[must_use = "dropping the subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct StateSubscription {
    id: u64,
    observers: Weak<Mutex<ObserverList>>,
}

impl StateSubscription {
    /// Remove the callback. A no-op if the session is already gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.observers.upgrade() {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .retain(|(id, _)| *id != self.id);
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
    queue: VecDeque<ClientMessage>,
    active_room: Option<RoomId>,
    observers: StateObservers,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy, observers: StateObservers) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            queue: VecDeque::new(),
            active_room: None,
            observers,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The room we are (or want to be) subscribed to.
    pub fn active_room(&self) -> Option<RoomId> {
        self.active_room
    }

    /// Failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Messages waiting for the next connect.
    pub fn queued(&self) -> impl Iterator<Item = &ClientMessage> {
        self.queue.iter()
    }

    /// Mark a connect attempt as started.
    pub fn begin_connect(&mut self) {
        if self.state != ConnectionState::Reconnecting {
            self.set_state(ConnectionState::Connecting);
        }
    }

    /// The transport is up. Returns the messages to send, in order: the
    /// queued messages, preceded by a re-subscribe for the active room when
    /// nothing queued already covers it.
    pub fn connected(&mut self) -> Vec<ClientMessage> {
        self.attempts = 0;
        self.set_state(ConnectionState::Connected);

        let mut flush = Vec::with_capacity(self.queue.len() + 1);
        if let Some(room_id) = self.active_room {
            let covered = self.queue.iter().any(|msg| {
                matches!(msg, ClientMessage::JoinRoom(r) if r.room_id == room_id)
            });
            if !covered {
                info!(room_id, "re-subscribing after connect");
                flush.push(ClientMessage::JoinRoom(RoomRef { room_id }));
            }
        }
        flush.extend(self.queue.drain(..));
        flush
    }

    /// A connect attempt failed with `error`.
    pub fn connect_failed(&mut self, error: &BingoSyncError) -> ConnectFailure {
        if error.is_auth() {
            warn!(%error, "credential refused, tearing down");
            self.teardown();
            self.set_state(ConnectionState::Error);
            return ConnectFailure::Teardown;
        }
        warn!(%error, attempt = self.attempts + 1, "connect failed");
        self.schedule_retry()
    }

    /// An established connection dropped.
    pub fn dropped(&mut self) -> ConnectFailure {
        if self.state != ConnectionState::Connected {
            return self.schedule_retry();
        }
        info!("connection lost, reconnecting");
        self.attempts = 0;
        self.schedule_retry()
    }

    /// User-initiated reconnect. Resets the attempt budget.
    pub fn manual_reconnect(&mut self) {
        self.attempts = 0;
        self.set_state(ConnectionState::Connecting);
    }

    /// User-initiated disconnect. The room intent survives so a later
    /// reconnect re-subscribes.
    pub fn disconnect(&mut self) {
        self.attempts = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Forget the room and every queued message.
    pub fn teardown(&mut self) {
        self.queue.clear();
        self.active_room = None;
        self.attempts = 0;
    }

    /// Subscribe to `room_id`. Returns the message to send now, or `None` if
    /// it was queued for the next connect.
    pub fn subscribe(&mut self, room_id: RoomId) -> Option<ClientMessage> {
        self.active_room = Some(room_id);
        let msg = ClientMessage::JoinRoom(RoomRef { room_id });
        if self.is_connected() {
            return Some(msg);
        }
        debug!(room_id, state = ?self.state, "queueing join until connected");
        self.queue.push_back(msg);
        None
    }

    /// Unsubscribe from `room_id`. While disconnected, nothing is queued:
    /// a fresh connection holds no subscriptions, so dropping the pending
    /// join is enough.
    pub fn unsubscribe(&mut self, room_id: RoomId) -> Option<ClientMessage> {
        if self.active_room == Some(room_id) {
            self.active_room = None;
        }
        if self.is_connected() {
            return Some(ClientMessage::LeaveRoom(RoomRef { room_id }));
        }
        self.queue.retain(|msg| {
            !matches!(msg, ClientMessage::JoinRoom(r) if r.room_id == room_id)
        });
        None
    }

    /// Put messages back at the front of the queue after a failed flush.
    pub fn requeue(&mut self, messages: Vec<ClientMessage>) {
        for msg in messages.into_iter().rev() {
            let is_room_join =
                matches!(&msg, ClientMessage::JoinRoom(r) if Some(r.room_id) == self.active_room);
            // The re-subscribe is rebuilt on the next connect.
            if !is_room_join {
                self.queue.push_front(msg);
            }
        }
    }

    fn schedule_retry(&mut self) -> ConnectFailure {
        if self.attempts >= self.policy.max_attempts {
            warn!(
                attempts = self.attempts,
                "reconnect attempts exhausted, giving up"
            );
            self.set_state(ConnectionState::Error);
            return ConnectFailure::GiveUp;
        }
        let delay = self.policy.delay(self.attempts);
        self.attempts += 1;
        self.set_state(ConnectionState::Reconnecting);
        debug!(attempt = self.attempts, ?delay, "reconnect scheduled");
        ConnectFailure::Retry(delay)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "connection state changed");
        self.state = state;
        self.observers.notify(state);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn manager(max_attempts: u32) -> ConnectionManager {
        ConnectionManager::new(
            ReconnectPolicy {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1000),
                max_attempts,
            },
            StateObservers::default(),
        )
    }

    fn join(room_id: RoomId) -> ClientMessage {
        ClientMessage::JoinRoom(RoomRef { room_id })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: 10,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn subscribe_while_disconnected_is_queued_and_flushed() {
        let mut conn = manager(3);
        assert!(conn.subscribe(7).is_none());
        assert_eq!(conn.queued().count(), 1);

        conn.begin_connect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        let flush = conn.connected();
        assert_eq!(flush, vec![join(7)]);
        assert_eq!(conn.queued().count(), 0);
    }

    #[test]
    fn subscribe_while_connected_sends_now() {
        let mut conn = manager(3);
        conn.connected();
        assert_eq!(conn.subscribe(7), Some(join(7)));
    }

    #[test]
    fn drop_resubscribes_active_room() {
        let mut conn = manager(3);
        conn.connected();
        conn.subscribe(7);
        assert!(matches!(conn.dropped(), ConnectFailure::Retry(_)));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.connected(), vec![join(7)]);
    }

    #[test]
    fn queue_flushes_fifo() {
        let mut conn = manager(3);
        conn.subscribe(1);
        conn.unsubscribe(1);
        conn.subscribe(2);
        conn.requeue(vec![ClientMessage::LeaveRoom(RoomRef { room_id: 9 })]);
        let flush = conn.connected();
        assert_eq!(
            flush,
            vec![ClientMessage::LeaveRoom(RoomRef { room_id: 9 }), join(2)]
        );
    }

    #[test]
    fn exhaustion_leaves_error_state() {
        let mut conn = manager(2);
        let err = BingoSyncError::TransportClosed;
        conn.begin_connect();
        assert_eq!(
            conn.connect_failed(&err),
            ConnectFailure::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            conn.connect_failed(&err),
            ConnectFailure::Retry(Duration::from_millis(200))
        );
        assert_eq!(conn.connect_failed(&err), ConnectFailure::GiveUp);
        assert_eq!(conn.state(), ConnectionState::Error);

        conn.manual_reconnect();
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn auth_failure_tears_down() {
        let mut conn = manager(5);
        conn.subscribe(3);
        let failure = conn.connect_failed(&BingoSyncError::Unauthorized("expired".into()));
        assert_eq!(failure, ConnectFailure::Teardown);
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(conn.active_room().is_none());
        assert_eq!(conn.queued().count(), 0);
    }

    #[test]
    fn observers_see_transitions_until_unsubscribed() {
        let observers = StateObservers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = observers.subscribe(move |state| sink.lock().unwrap().push(state));

        let mut conn = ConnectionManager::new(ReconnectPolicy::default(), observers.clone());
        conn.begin_connect();
        conn.connected();
        sub.unsubscribe();
        conn.dropped();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(observers.is_empty());
    }
}
