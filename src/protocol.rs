//! Wire-compatible protocol types for the bingo event stream.
//!
//! Every frame is a JSON object `{"event": "<kebab-name>", "data": {...}}`
//! with camelCase payload fields. Inbound frames are decoded in two steps by
//! [`ServerEvent::decode`]: a serde shape check, then semantic validation.
//! A frame that fails either step is a malformed event and never reaches the
//! round state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BingoSyncError, Result};
use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Identifier of a bingo room.
pub type RoomId = u64;

/// Identifier of a bingo card owned by a player.
pub type CardId = u64;

/// Identifier of a player.
pub type PlayerId = u64;

/// Round number within a room; `0` means "no round seen yet".
pub type RoundNumber = u32;

/// Identifier of a win pattern (e.g. `"full_house"`, `"line"`).
pub type PatternId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle phase of a round.
///
/// Declaration order is progression order: phases only ever move to a
/// later variant within one round. `RoomFinished` supersedes all of them.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Pending,
    Starting,
    InProgress,
    BingoClaimWindow,
    Finished,
    RoomFinished,
}

impl Phase {
    /// Returns `true` while claims may be submitted.
    pub fn accepts_claims(&self) -> bool {
        matches!(self, Self::InProgress | Self::BingoClaimWindow)
    }
}

/// Status of the room as a whole.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Active,
    Finished,
}

/// The four independent countdown windows a room can display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CountdownKind {
    RoomStart,
    RoundStart,
    RoundTransition,
    BingoClaim,
}

impl CountdownKind {
    /// All kinds, in display order.
    pub const ALL: [CountdownKind; 4] = [
        Self::RoomStart,
        Self::RoundStart,
        Self::RoundTransition,
        Self::BingoClaim,
    ];

    /// Returns `true` if the window belongs to a specific round, as opposed
    /// to the room as a whole.
    pub fn is_round_scoped(&self) -> bool {
        !matches!(self, Self::RoomStart)
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// A number drawn by the server, e.g. `"B-7"`. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalledNumber {
    pub value: String,
    pub called_at: DateTime<Utc>,
}

/// A player who won a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    pub card_id: CardId,
    pub round_number: RoundNumber,
    #[serde(default)]
    pub prize_amount: f64,
}

/// Largest `secondsRemaining` magnitude a countdown may carry (one day).
pub const MAX_COUNTDOWN_SECONDS: f64 = 86_400.0;

/// A countdown as the server describes it: either an absolute deadline in
/// server time, or a number of seconds from "now".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CountdownPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<RoundNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_at: Option<DateTime<Utc>>,
}

impl CountdownPayload {
    /// Resolve this countdown to an absolute server-clock deadline.
    ///
    /// `server_now` is the local clock already shifted by the session's
    /// server clock offset.
    pub fn deadline(&self, server_now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(finish_at) = self.finish_at {
            return Some(finish_at);
        }
        let seconds = self.seconds_remaining?;
        if !seconds.is_finite() || seconds.abs() > MAX_COUNTDOWN_SECONDS {
            return None;
        }
        let millis = (seconds * 1000.0).round() as i64;
        chrono::Duration::try_milliseconds(millis)
            .and_then(|delta| server_now.checked_add_signed(delta))
    }

    fn validate(&self, event: &str) -> Result<()> {
        check_round(event, self.round_number)?;
        match (self.finish_at, self.seconds_remaining) {
            (None, None) => Err(BingoSyncError::malformed(
                event,
                "countdown carries neither finishAt nor secondsRemaining",
            )),
            (None, Some(seconds)) if !seconds.is_finite() => Err(BingoSyncError::malformed(
                event,
                "secondsRemaining is not a finite number",
            )),
            (None, Some(seconds)) if seconds.abs() > MAX_COUNTDOWN_SECONDS => Err(
                BingoSyncError::malformed(event, "secondsRemaining is out of range"),
            ),
            _ => Ok(()),
        }
    }
}

/// Round metadata as reported by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    pub number: RoundNumber,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternId>,
    #[serde(default)]
    pub prize_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Room metadata as reported by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<RoundInfo>,
}

/// The round portion of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRound {
    pub number: RoundNumber,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternId>,
    #[serde(default)]
    pub prize_amount: f64,
    #[serde(default)]
    pub called_numbers: Vec<CalledNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_called_at: Option<DateTime<Utc>>,
}

/// An active countdown carried inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCountdown {
    pub kind: CountdownKind,
    pub finish_at: DateTime<Utc>,
}

/// A full, authoritative description of a room's current round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub room_status: RoomStatus,
    /// `None` means the room has no active round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<SnapshotRound>,
    #[serde(default)]
    pub countdowns: Vec<SnapshotCountdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<Winner>>,
}

impl RoundSnapshot {
    /// Build a snapshot from REST metadata plus a backfilled called-number list.
    pub fn from_parts(room: RoomInfo, called_numbers: Vec<CalledNumber>) -> Self {
        let round = room.current_round.map(|info| SnapshotRound {
            number: info.number,
            phase: info.phase,
            pattern: info.pattern,
            prize_amount: info.prize_amount,
            last_called_at: info
                .last_called_at
                .or_else(|| called_numbers.last().map(|n| n.called_at)),
            called_numbers,
        });
        Self {
            room_id: Some(room.room_id),
            room_status: room.status,
            round,
            countdowns: Vec::new(),
            winners: None,
        }
    }

    fn validate(&self, event: &str) -> Result<()> {
        if let Some(round) = &self.round {
            check_round(event, Some(round.number))?;
            if round.called_numbers.iter().any(|n| n.value.trim().is_empty()) {
                return Err(BingoSyncError::malformed(event, "empty called number"));
            }
        }
        Ok(())
    }
}

// ── Inbound payloads ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartingPayload {
    pub round_number: RoundNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prize_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_at: Option<DateTime<Utc>>,
}

impl RoundStartingPayload {
    /// The round-start countdown this event carries.
    pub fn countdown(&self) -> CountdownPayload {
        CountdownPayload {
            round_number: Some(self.round_number),
            seconds_remaining: self.seconds_remaining,
            finish_at: self.finish_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartedPayload {
    pub round_number: RoundNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prize_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundFinishedPayload {
    pub round_number: RoundNumber,
    #[serde(default)]
    pub winners: Vec<Winner>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NumberCalledPayload {
    pub round_number: RoundNumber,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStatusChangedPayload {
    pub round_number: RoundNumber,
    pub status: Phase,
}

fn first_claim_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinAssertedPayload {
    pub round_number: RoundNumber,
    pub card_id: CardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// Whether this is the first accepted claim of the round.
    #[serde(default = "first_claim_default")]
    pub first_claim: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoomFinishedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<Winner>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusUpdatedPayload {
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<RoundNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<Winner>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CountdownStoppedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<RoundNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CountdownKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundCleanupPayload {
    pub round_number: RoundNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoomPendingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The server's answer to a `submit-claim`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVerdictPayload {
    pub request_id: Uuid,
    pub round_number: RoundNumber,
    pub card_id: CardId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoundStarting(RoundStartingPayload),
    RoundStarted(RoundStartedPayload),
    RoundFinished(RoundFinishedPayload),
    NumberCalled(NumberCalledPayload),
    RoundStatusChanged(RoundStatusChangedPayload),
    RoundTransitionCountdown(CountdownPayload),
    RoundStartCountdown(CountdownPayload),
    BingoClaimCountdown(CountdownPayload),
    RoomStartCountdown(CountdownPayload),
    WinAsserted(WinAssertedPayload),
    RoomFinished(RoomFinishedPayload),
    RoomStatusUpdated(RoomStatusUpdatedPayload),
    /// Full-state snapshot (boxed to reduce enum size).
    RoomStateSync(Box<RoundSnapshot>),
    RoundCountdownStopped(CountdownStoppedPayload),
    RoundCleanup(RoundCleanupPayload),
    RoomPending(RoomPendingPayload),
    ClaimVerdict(ClaimVerdictPayload),
    Error(ErrorPayload),
}

/// Discriminant of a [`ServerEvent`], used to key listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    RoundStarting,
    RoundStarted,
    RoundFinished,
    NumberCalled,
    RoundStatusChanged,
    RoundTransitionCountdown,
    RoundStartCountdown,
    BingoClaimCountdown,
    RoomStartCountdown,
    WinAsserted,
    RoomFinished,
    RoomStatusUpdated,
    RoomStateSync,
    RoundCountdownStopped,
    RoundCleanup,
    RoomPending,
    ClaimVerdict,
    Error,
}

impl EventKind {
    const ALL: [EventKind; 18] = [
        Self::RoundStarting,
        Self::RoundStarted,
        Self::RoundFinished,
        Self::NumberCalled,
        Self::RoundStatusChanged,
        Self::RoundTransitionCountdown,
        Self::RoundStartCountdown,
        Self::BingoClaimCountdown,
        Self::RoomStartCountdown,
        Self::WinAsserted,
        Self::RoomFinished,
        Self::RoomStatusUpdated,
        Self::RoomStateSync,
        Self::RoundCountdownStopped,
        Self::RoundCleanup,
        Self::RoomPending,
        Self::ClaimVerdict,
        Self::Error,
    ];

    /// The event name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundStarting => "round-starting",
            Self::RoundStarted => "round-started",
            Self::RoundFinished => "round-finished",
            Self::NumberCalled => "number-called",
            Self::RoundStatusChanged => "round-status-changed",
            Self::RoundTransitionCountdown => "round-transition-countdown",
            Self::RoundStartCountdown => "round-start-countdown",
            Self::BingoClaimCountdown => "bingo-claim-countdown",
            Self::RoomStartCountdown => "room-start-countdown",
            Self::WinAsserted => "win-asserted",
            Self::RoomFinished => "room-finished",
            Self::RoomStatusUpdated => "room-status-updated",
            Self::RoomStateSync => "room-state-sync",
            Self::RoundCountdownStopped => "round-countdown-stopped",
            Self::RoundCleanup => "round-cleanup",
            Self::RoomPending => "room-pending",
            Self::ClaimVerdict => "claim-verdict",
            Self::Error => "error",
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Outer frame shape, used to learn the event name before the payload is
/// trusted.
#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ServerEvent {
    /// Decode and validate one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::MalformedEvent`] for unknown event names,
    /// payloads missing required fields, and payloads that fail semantic
    /// checks (round numbers below 1, empty called values, countdowns without
    /// a deadline).
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| BingoSyncError::malformed("unknown", e.to_string()))?;
        if EventKind::from_wire(&raw.event).is_none() {
            return Err(BingoSyncError::malformed(raw.event, "unrecognized event name"));
        }
        let data = raw
            .data
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let frame = serde_json::json!({ "event": raw.event.clone(), "data": data });
        let event: ServerEvent = serde_json::from_value(frame)
            .map_err(|e| BingoSyncError::malformed(raw.event.as_str(), e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Serialize this event as a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::Serialization`] if a payload cannot be encoded.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RoundStarting(_) => EventKind::RoundStarting,
            Self::RoundStarted(_) => EventKind::RoundStarted,
            Self::RoundFinished(_) => EventKind::RoundFinished,
            Self::NumberCalled(_) => EventKind::NumberCalled,
            Self::RoundStatusChanged(_) => EventKind::RoundStatusChanged,
            Self::RoundTransitionCountdown(_) => EventKind::RoundTransitionCountdown,
            Self::RoundStartCountdown(_) => EventKind::RoundStartCountdown,
            Self::BingoClaimCountdown(_) => EventKind::BingoClaimCountdown,
            Self::RoomStartCountdown(_) => EventKind::RoomStartCountdown,
            Self::WinAsserted(_) => EventKind::WinAsserted,
            Self::RoomFinished(_) => EventKind::RoomFinished,
            Self::RoomStatusUpdated(_) => EventKind::RoomStatusUpdated,
            Self::RoomStateSync(_) => EventKind::RoomStateSync,
            Self::RoundCountdownStopped(_) => EventKind::RoundCountdownStopped,
            Self::RoundCleanup(_) => EventKind::RoundCleanup,
            Self::RoomPending(_) => EventKind::RoomPending,
            Self::ClaimVerdict(_) => EventKind::ClaimVerdict,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// The round this event is scoped to, if any.
    pub fn round_number(&self) -> Option<RoundNumber> {
        match self {
            Self::RoundStarting(p) => Some(p.round_number),
            Self::RoundStarted(p) => Some(p.round_number),
            Self::RoundFinished(p) => Some(p.round_number),
            Self::NumberCalled(p) => Some(p.round_number),
            Self::RoundStatusChanged(p) => Some(p.round_number),
            Self::RoundTransitionCountdown(p)
            | Self::RoundStartCountdown(p)
            | Self::BingoClaimCountdown(p) => p.round_number,
            Self::WinAsserted(p) => Some(p.round_number),
            Self::RoomStatusUpdated(p) => p.round_number,
            Self::RoomStateSync(s) => s.round.as_ref().map(|r| r.number),
            Self::RoundCountdownStopped(p) => p.round_number,
            Self::RoundCleanup(p) => Some(p.round_number),
            Self::ClaimVerdict(p) => Some(p.round_number),
            Self::RoomStartCountdown(_)
            | Self::RoomFinished(_)
            | Self::RoomPending(_)
            | Self::Error(_) => None,
        }
    }

    /// Returns `true` for events that carry the room's winners list. These
    /// are still honoured after the room has finished.
    pub fn carries_winners(&self) -> bool {
        match self {
            Self::RoomFinished(p) => p.winners.is_some(),
            Self::RoomStatusUpdated(p) => p.winners.is_some(),
            Self::RoundFinished(p) => !p.winners.is_empty(),
            _ => false,
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.kind().as_str();
        match self {
            Self::RoundStarting(p) => {
                check_round(name, Some(p.round_number))?;
                p.countdown().validate(name)
            }
            Self::NumberCalled(p) => {
                check_round(name, Some(p.round_number))?;
                if p.number.trim().is_empty() {
                    return Err(BingoSyncError::malformed(name, "empty called number"));
                }
                Ok(())
            }
            Self::RoundTransitionCountdown(p)
            | Self::RoundStartCountdown(p)
            | Self::BingoClaimCountdown(p)
            | Self::RoomStartCountdown(p) => p.validate(name),
            Self::RoomStateSync(s) => s.validate(name),
            Self::RoundStatusChanged(p) => {
                check_round(name, Some(p.round_number))?;
                if p.status == Phase::RoomFinished {
                    return Err(BingoSyncError::malformed(
                        name,
                        "room_finished is not a round status",
                    ));
                }
                Ok(())
            }
            other => check_round(name, other.round_number()),
        }
    }
}

fn check_round(event: &str, round: Option<RoundNumber>) -> Result<()> {
    match round {
        Some(0) => Err(BingoSyncError::malformed(event, "round number must be >= 1")),
        _ => Ok(()),
    }
}

/// A room reference carried by join/leave messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

/// A win assertion for one card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub request_id: Uuid,
    pub room_id: RoomId,
    pub round_number: RoundNumber,
    pub card_id: CardId,
    pub marked_numbers: Vec<String>,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
    SubmitClaim(ClaimRequest),
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

    #[test]
    fn decodes_number_called() {
        let event = ServerEvent::decode(
            r#"{"event":"number-called","data":{"roundNumber":2,"number":"B-7","calledAt":"2026-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::NumberCalled(p) => {
                assert_eq!(p.round_number, 2);
                assert_eq!(p.number, "B-7");
                assert!(p.called_at.is_some());
            }
            other => panic!("expected NumberCalled, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = ServerEvent::decode(r#"{"event":"number-called","data":{"number":"B-7"}}"#)
            .unwrap_err();
        assert!(matches!(err, BingoSyncError::MalformedEvent { ref event, .. } if event == "number-called"));
    }

    #[test]
    fn round_zero_is_malformed() {
        let err = ServerEvent::decode(
            r#"{"event":"round-finished","data":{"roundNumber":0}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BingoSyncError::MalformedEvent { .. }));
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = ServerEvent::decode(r#"{"event":"chat-message","data":{}}"#).unwrap_err();
        assert!(
            matches!(err, BingoSyncError::MalformedEvent { ref reason, .. } if reason.contains("unrecognized"))
        );
    }

    #[test]
    fn not_json_is_malformed() {
        assert!(matches!(
            ServerEvent::decode("not json").unwrap_err(),
            BingoSyncError::MalformedEvent { .. }
        ));
    }

    #[test]
    fn payloadless_room_pending_decodes() {
        let event = ServerEvent::decode(r#"{"event":"room-pending"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::RoomPending);
        let event = ServerEvent::decode(r#"{"event":"room-pending","data":null}"#).unwrap();
        assert_eq!(event.kind(), EventKind::RoomPending);
    }

    #[test]
    fn countdown_requires_deadline() {
        let err = ServerEvent::decode(r#"{"event":"bingo-claim-countdown","data":{"roundNumber":3}}"#)
            .unwrap_err();
        assert!(matches!(err, BingoSyncError::MalformedEvent { .. }));

        let ok = ServerEvent::decode(
            r#"{"event":"bingo-claim-countdown","data":{"roundNumber":3,"secondsRemaining":15}}"#,
        )
        .unwrap();
        assert_eq!(ok.round_number(), Some(3));
    }

    #[test]
    fn countdown_deadline_from_seconds() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = CountdownPayload {
            round_number: None,
            seconds_remaining: Some(2.5),
            finish_at: None,
        };
        assert_eq!(
            payload.deadline(now),
            Some(now + chrono::Duration::milliseconds(2500))
        );
    }

    #[test]
    fn countdown_seconds_out_of_range_is_malformed() {
        for seconds in ["1e300", "-1e300", "86401"] {
            let frame = format!(
                r#"{{"event":"bingo-claim-countdown","data":{{"roundNumber":1,"secondsRemaining":{seconds}}}}}"#
            );
            let err = ServerEvent::decode(&frame).unwrap_err();
            assert!(matches!(err, BingoSyncError::MalformedEvent { .. }), "{seconds}");
        }
        let frame = r#"{"event":"round-starting","data":{"roundNumber":2,"secondsRemaining":1e300}}"#;
        assert!(ServerEvent::decode(frame).is_err());
    }

    #[test]
    fn countdown_deadline_never_overflows() {
        let payload = CountdownPayload {
            round_number: None,
            seconds_remaining: Some(1e300),
            finish_at: None,
        };
        assert_eq!(payload.deadline(Utc::now()), None);

        let near_end = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1);
        let payload = CountdownPayload {
            round_number: None,
            seconds_remaining: Some(60.0),
            finish_at: None,
        };
        assert_eq!(payload.deadline(near_end), None);
    }

    #[test]
    fn snapshot_event_round_number() {
        let event = ServerEvent::decode(
            r#"{"event":"room-state-sync","data":{"roomStatus":"active","round":{"number":5,"phase":"in_progress","calledNumbers":[]}}}"#,
        )
        .unwrap();
        assert_eq!(event.round_number(), Some(5));
    }

    #[test]
    fn round_status_cannot_be_room_finished() {
        let err = ServerEvent::decode(
            r#"{"event":"round-status-changed","data":{"roundNumber":1,"status":"room_finished"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BingoSyncError::MalformedEvent { .. }));
    }

    #[test]
    fn submit_claim_wire_shape() {
        let msg = ClientMessage::SubmitClaim(ClaimRequest {
            request_id: Uuid::nil(),
            room_id: 9,
            round_number: 2,
            card_id: 77,
            marked_numbers: vec!["B-7".into()],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "submit-claim");
        assert_eq!(value["data"]["roomId"], 9);
        assert_eq!(value["data"]["cardId"], 77);
        assert_eq!(value["data"]["markedNumbers"][0], "B-7");
    }

    #[test]
    fn wire_names_match_kinds() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn phase_order_is_progression() {
        assert!(Phase::Pending < Phase::Starting);
        assert!(Phase::Starting < Phase::InProgress);
        assert!(Phase::InProgress < Phase::BingoClaimWindow);
        assert!(Phase::BingoClaimWindow < Phase::Finished);
        assert!(Phase::Finished < Phase::RoomFinished);
    }

    #[test]
    fn win_asserted_defaults_to_first_claim() {
        let event = ServerEvent::decode(
            r#"{"event":"win-asserted","data":{"roundNumber":4,"cardId":12}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::WinAsserted(p) => assert!(p.first_claim),
            other => panic!("expected WinAsserted, got {other:?}"),
        }
    }
}
