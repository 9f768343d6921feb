//! Notifications pushed from the session to the rendering layer.
//!
//! [`SyncEvent`]s arrive on the bounded channel returned by
//! [`SyncSession::open`](crate::SyncSession::open). They describe *changes*;
//! the full current state is always available from
//! [`SyncSession::view`](crate::SyncSession::view).

use std::collections::BTreeMap;

use crate::claim::ClaimOutcome;
use crate::connection::ConnectionState;
use crate::protocol::{
    CalledNumber, CardId, CountdownKind, Phase, PlayerId, RoundNumber, Winner,
};
use crate::snapshot::ReconcileReason;

/// A change the rendering layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The connection moved to a new state.
    ConnectionChanged(ConnectionState),

    /// The session caught up to a newer round; per-round state was cleared.
    RoundAdvanced {
        from: RoundNumber,
        to: RoundNumber,
    },

    /// The current round's phase moved.
    PhaseChanged {
        round_number: RoundNumber,
        from: Phase,
        to: Phase,
    },

    /// A new number was called.
    NumberCalled {
        round_number: RoundNumber,
        number: CalledNumber,
    },

    /// Remaining whole seconds per active countdown, emitted once per second
    /// of change rather than once per tick.
    CountdownTick(BTreeMap<CountdownKind, u64>),

    /// A countdown reached zero. The phase is unaffected until the server
    /// says otherwise.
    CountdownExpired(CountdownKind),

    /// A snapshot overwrote local state.
    Reconciled {
        reason: ReconcileReason,
        round_number: RoundNumber,
        phase: Phase,
    },

    /// Someone's claim was accepted by the server.
    WinAsserted {
        round_number: RoundNumber,
        card_id: CardId,
        player_id: Option<PlayerId>,
        player_name: Option<String>,
    },

    /// A local claim completed.
    ClaimResolved(ClaimOutcome),

    /// The room has ended.
    RoomFinished { winners: Vec<Winner> },

    /// The winners list changed after the room finished.
    WinnersUpdated(Vec<Winner>),

    /// Local state disagrees with the server in a way the session cannot
    /// heal; the user should reload.
    SyncFault { reason: String },

    /// The server refused the credential. The session has torn down and
    /// needs re-authentication.
    AuthFault { reason: String },

    /// Reconnect attempts were exhausted. Call
    /// [`SyncSession::reconnect`](crate::SyncSession::reconnect) to try again.
    ConnectionLost { attempts: u32 },

    /// The session stopped. Always the last event on the channel.
    Closed { reason: Option<String> },
}
