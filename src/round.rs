//! Round state store.
//!
//! Holds the current round number, phase and called-number sequence, and is
//! the single place where round-number monotonicity and phase progression are
//! enforced. Inbound events move the phase; nothing local does, apart from the
//! claim-accept nudge which the server's own event later overwrites.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::protocol::{
    CalledNumber, PatternId, Phase, RoomStatus, RoundNumber, RoundSnapshot, ServerEvent, Winner,
};

/// Default length of the recent-numbers view.
pub const DEFAULT_RECENT_NUMBERS_LEN: usize = 3;

/// One numbered game unit within a room.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Round {
    /// Round number; `0` until the first round-scoped event is seen.
    pub number: RoundNumber,
    pub phase: Phase,
    pub pattern: Option<PatternId>,
    /// Called numbers in call order, unique by value.
    pub called_numbers: Vec<CalledNumber>,
    pub last_called_at: Option<DateTime<Utc>>,
    pub prize_amount: f64,
}

/// How an inbound event relates to the store's current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event is not scoped to a round.
    Unscoped,
    /// The event targets the current round.
    Current,
    /// The event targets a later round; per-round state must be reset before
    /// applying it.
    Advance {
        from: RoundNumber,
        to: RoundNumber,
    },
    /// The event targets an earlier round and must be discarded.
    Stale {
        current: RoundNumber,
        got: RoundNumber,
    },
    /// The room has finished and the event carries no winners data.
    RoomClosed,
}

/// A visible change produced by applying an event or snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    PhaseChanged { from: Phase, to: Phase },
    NumberCalled(CalledNumber),
    RoundDetails,
    RoomStatus(RoomStatus),
    WinnersUpdated,
}

/// Round state owned by the engine. Exposed to the rendering layer only as
/// read-only copies.
#[derive(Debug, Clone)]
pub struct RoundStateStore {
    round: Round,
    called_set: HashSet<String>,
    recent: VecDeque<CalledNumber>,
    recent_len: usize,
    room_status: RoomStatus,
    winners: Vec<Winner>,
}

impl Default for RoundStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_NUMBERS_LEN)
    }
}

impl RoundStateStore {
    /// Create an empty store whose recent-numbers view keeps `recent_len` entries.
    pub fn new(recent_len: usize) -> Self {
        Self {
            round: Round::default(),
            called_set: HashSet::new(),
            recent: VecDeque::new(),
            recent_len: recent_len.max(1),
            room_status: RoomStatus::default(),
            winners: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn number(&self) -> RoundNumber {
        self.round.number
    }

    pub fn phase(&self) -> Phase {
        self.round.phase
    }

    pub fn room_status(&self) -> RoomStatus {
        self.room_status
    }

    pub fn winners(&self) -> &[Winner] {
        &self.winners
    }

    pub fn is_room_finished(&self) -> bool {
        self.round.phase == Phase::RoomFinished
    }

    /// Returns `true` if `value` has been called in the current round.
    pub fn is_called(&self, value: &str) -> bool {
        self.called_set.contains(value)
    }

    /// Most recent called numbers, newest first.
    pub fn recent_numbers(&self) -> Vec<CalledNumber> {
        self.recent.iter().cloned().collect()
    }

    // ── Guards ──────────────────────────────────────────────────────

    /// Classify `event` against the current round before anything is applied.
    pub fn admit(&self, event: &ServerEvent) -> Admission {
        if self.is_room_finished() && !event.carries_winners() {
            return Admission::RoomClosed;
        }
        match event.round_number() {
            None => Admission::Unscoped,
            Some(got) => self.admit_round(got),
        }
    }

    /// Classify a bare round number against the current round.
    pub fn admit_round(&self, got: RoundNumber) -> Admission {
        let current = self.round.number;
        if got < current {
            Admission::Stale { current, got }
        } else if got > current {
            Admission::Advance { from: current, to: got }
        } else {
            Admission::Current
        }
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Adopt `number` as the current round and clear every per-round
    /// accumulator. Ignored if `number` is below the current round.
    ///
    /// The room-finished phase survives this; nothing restarts a finished room.
    pub fn begin_round(&mut self, number: RoundNumber) {
        if number < self.round.number {
            debug!(
                current = self.round.number,
                requested = number,
                "refusing to move round number backwards"
            );
            return;
        }
        let phase = if self.is_room_finished() {
            Phase::RoomFinished
        } else {
            Phase::Pending
        };
        self.round = Round {
            number,
            phase,
            ..Round::default()
        };
        self.called_set.clear();
        self.recent.clear();
    }

    /// Clear called numbers and the recent view without touching the round
    /// number or phase.
    pub fn clear_called(&mut self) {
        self.round.called_numbers.clear();
        self.round.last_called_at = None;
        self.called_set.clear();
        self.recent.clear();
    }

    /// Apply one admitted event. `server_now` stamps numbers the server sent
    /// without a call time.
    ///
    /// Stale events are re-checked and dropped here too, so a caller that
    /// skipped [`admit`](Self::admit) cannot regress the round.
    pub fn apply(&mut self, event: &ServerEvent, server_now: DateTime<Utc>) -> Vec<StoreChange> {
        let mut changes = Vec::new();
        match self.admit(event) {
            Admission::Stale { current, got } => {
                debug!(current, got, event = event.kind().as_str(), "dropping stale event");
                return changes;
            }
            Admission::Advance { to, .. } => self.begin_round(to),
            Admission::RoomClosed => {
                debug!(event = event.kind().as_str(), "room finished, ignoring event");
                return changes;
            }
            Admission::Current | Admission::Unscoped => {}
        }

        if self.is_room_finished() {
            // Only winners data gets through once the room is done.
            self.absorb_winners(event, &mut changes);
            return changes;
        }

        match event {
            ServerEvent::RoundStarting(p) => {
                self.set_details(p.pattern.clone(), p.prize_amount, &mut changes);
                self.advance(Phase::Starting, &mut changes);
            }
            ServerEvent::RoundStarted(p) => {
                self.set_details(p.pattern.clone(), p.prize_amount, &mut changes);
                self.advance(Phase::Starting, &mut changes);
            }
            ServerEvent::NumberCalled(p) => {
                if self.round.phase >= Phase::Finished {
                    debug!(number = %p.number, "round finished, ignoring called number");
                    return changes;
                }
                let called = CalledNumber {
                    value: p.number.trim().to_string(),
                    called_at: p.called_at.unwrap_or(server_now),
                };
                if self.ingest(called.clone()) {
                    changes.push(StoreChange::NumberCalled(called));
                    self.advance(Phase::InProgress, &mut changes);
                } else {
                    debug!(number = %p.number, "duplicate called number");
                }
            }
            ServerEvent::RoundStatusChanged(p) => self.advance(p.status, &mut changes),
            ServerEvent::WinAsserted(p) => {
                if p.first_claim {
                    self.advance(Phase::BingoClaimWindow, &mut changes);
                }
            }
            ServerEvent::RoundFinished(p) => {
                self.advance(Phase::Finished, &mut changes);
                if !p.winners.is_empty() {
                    self.merge_winners(&p.winners);
                    changes.push(StoreChange::WinnersUpdated);
                }
            }
            ServerEvent::RoomFinished(_) => {
                self.finish_room(&mut changes);
                self.absorb_winners(event, &mut changes);
            }
            ServerEvent::RoomStatusUpdated(p) => {
                self.set_room_status(p.status, &mut changes);
                if p.status == RoomStatus::Finished {
                    self.finish_room(&mut changes);
                }
                self.absorb_winners(event, &mut changes);
            }
            ServerEvent::RoomPending(_) => self.set_room_status(RoomStatus::Waiting, &mut changes),
            // Countdowns, snapshots, cleanup, verdicts and errors are handled
            // by the other components.
            _ => {}
        }
        changes
    }

    /// Overwrite phase, called numbers and last-called time from an
    /// authoritative snapshot. The caller has already adopted the snapshot's
    /// round number (and reset per-round state) if it was ahead.
    pub fn apply_snapshot(&mut self, snapshot: &RoundSnapshot) -> Vec<StoreChange> {
        let mut changes = Vec::new();
        if let Some(winners) = &snapshot.winners {
            self.winners = winners.clone();
            changes.push(StoreChange::WinnersUpdated);
        }
        if self.is_room_finished() {
            return changes;
        }
        self.set_room_status(snapshot.room_status, &mut changes);
        if snapshot.room_status == RoomStatus::Finished {
            self.finish_room(&mut changes);
            return changes;
        }

        let from = self.round.phase;
        match &snapshot.round {
            None => {
                self.clear_called();
                self.round.phase = Phase::Pending;
            }
            Some(round) => {
                if round.number < self.round.number {
                    debug!(
                        current = self.round.number,
                        snapshot = round.number,
                        "dropping stale snapshot"
                    );
                    return changes;
                }
                if round.number > self.round.number {
                    self.begin_round(round.number);
                }
                self.clear_called();
                for called in &round.called_numbers {
                    let called = CalledNumber {
                        value: called.value.trim().to_string(),
                        called_at: called.called_at,
                    };
                    self.ingest(called);
                }
                if let Some(at) = round.last_called_at {
                    self.round.last_called_at = Some(at);
                }
                // The snapshot wins even where it moves the phase backwards.
                self.round.phase = round.phase;
                self.round.pattern = round.pattern.clone();
                self.round.prize_amount = round.prize_amount;
                changes.push(StoreChange::RoundDetails);
            }
        }
        if from != self.round.phase {
            changes.push(StoreChange::PhaseChanged {
                from,
                to: self.round.phase,
            });
        }
        changes
    }

    /// Move to the claim window after a locally accepted claim, ahead of the
    /// server's `win-asserted`. Returns `true` if the phase moved.
    pub fn nudge_claim_window(&mut self, round: RoundNumber) -> bool {
        if round != self.round.number || self.round.phase != Phase::InProgress {
            return false;
        }
        self.round.phase = Phase::BingoClaimWindow;
        debug!(round, "claim accepted, entering claim window ahead of server event");
        true
    }

    /// Replace the winners list (e.g. from a REST fetch).
    pub fn set_winners(&mut self, winners: Vec<Winner>) {
        self.winners = winners;
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Record a called number if its value is new. Returns `false` for
    /// duplicates.
    fn ingest(&mut self, called: CalledNumber) -> bool {
        if !self.called_set.insert(called.value.clone()) {
            return false;
        }
        let newer = self
            .round
            .last_called_at
            .is_none_or(|last| called.called_at >= last);
        if newer {
            self.round.last_called_at = Some(called.called_at);
        }
        self.recent.push_front(called.clone());
        self.recent.truncate(self.recent_len);
        self.round.called_numbers.push(called);
        true
    }

    fn advance(&mut self, to: Phase, changes: &mut Vec<StoreChange>) {
        let from = self.round.phase;
        if to <= from || from == Phase::RoomFinished {
            return;
        }
        self.round.phase = to;
        debug!(round = self.round.number, ?from, ?to, "phase advanced");
        changes.push(StoreChange::PhaseChanged { from, to });
    }

    fn finish_room(&mut self, changes: &mut Vec<StoreChange>) {
        self.set_room_status(RoomStatus::Finished, changes);
        self.advance(Phase::RoomFinished, changes);
    }

    fn set_room_status(&mut self, status: RoomStatus, changes: &mut Vec<StoreChange>) {
        if self.room_status != status {
            self.room_status = status;
            changes.push(StoreChange::RoomStatus(status));
        }
    }

    fn set_details(
        &mut self,
        pattern: Option<PatternId>,
        prize_amount: Option<f64>,
        changes: &mut Vec<StoreChange>,
    ) {
        let mut changed = false;
        if pattern.is_some() && pattern != self.round.pattern {
            self.round.pattern = pattern;
            changed = true;
        }
        if let Some(prize) = prize_amount {
            self.round.prize_amount = prize;
            changed = true;
        }
        if changed {
            changes.push(StoreChange::RoundDetails);
        }
    }

    fn absorb_winners(&mut self, event: &ServerEvent, changes: &mut Vec<StoreChange>) {
        let winners = match event {
            ServerEvent::RoomFinished(p) => p.winners.as_deref(),
            ServerEvent::RoomStatusUpdated(p) => p.winners.as_deref(),
            ServerEvent::RoundFinished(p) if !p.winners.is_empty() => Some(p.winners.as_slice()),
            _ => None,
        };
        if let Some(winners) = winners {
            self.merge_winners(winners);
            changes.push(StoreChange::WinnersUpdated);
        }
    }

    fn merge_winners(&mut self, winners: &[Winner]) {
        for winner in winners {
            let known = self.winners.iter().any(|w| {
                w.round_number == winner.round_number
                    && w.card_id == winner.card_id
                    && w.player_id == winner.player_id
            });
            if !known {
                self.winners.push(winner.clone());
            }
        }
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
    use crate::protocol::{
        NumberCalledPayload, RoomFinishedPayload, RoundFinishedPayload, RoundStartedPayload,
        RoundStartingPayload, RoundStatusChangedPayload, SnapshotRound, WinAssertedPayload,
    };

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        at("2026-01-01T00:00:00Z")
    }

    fn called(round: RoundNumber, number: &str) -> ServerEvent {
        ServerEvent::NumberCalled(NumberCalledPayload {
            round_number: round,
            number: number.into(),
            called_at: None,
        })
    }

    fn starting(round: RoundNumber) -> ServerEvent {
        ServerEvent::RoundStarting(RoundStartingPayload {
            round_number: round,
            pattern: Some("line".into()),
            prize_amount: Some(25.0),
            seconds_remaining: Some(10.0),
            finish_at: None,
        })
    }

    fn status(round: RoundNumber, phase: Phase) -> ServerEvent {
        ServerEvent::RoundStatusChanged(RoundStatusChangedPayload {
            round_number: round,
            status: phase,
        })
    }

    fn values(store: &RoundStateStore) -> Vec<String> {
        store
            .round()
            .called_numbers
            .iter()
            .map(|n| n.value.clone())
            .collect()
    }

    fn in_progress(round: RoundNumber, numbers: &[&str]) -> RoundStateStore {
        let mut store = RoundStateStore::default();
        store.apply(&starting(round), now());
        for n in numbers {
            store.apply(&called(round, n), now());
        }
        store
    }

    #[test]
    fn duplicate_number_is_idempotent() {
        let mut store = in_progress(2, &["B-7", "I-22"]);
        assert_eq!(store.phase(), Phase::InProgress);

        let changes = store.apply(&called(2, "B-7"), now());
        assert!(changes.is_empty());
        assert_eq!(values(&store), vec!["B-7", "I-22"]);
    }

    #[test]
    fn first_number_moves_starting_to_in_progress() {
        let mut store = RoundStateStore::default();
        store.apply(&starting(1), now());
        assert_eq!(store.phase(), Phase::Starting);
        assert_eq!(store.round().pattern.as_deref(), Some("line"));

        let changes = store.apply(&called(1, "N-41"), now());
        assert!(changes.contains(&StoreChange::PhaseChanged {
            from: Phase::Starting,
            to: Phase::InProgress
        }));
    }

    #[test]
    fn status_change_also_moves_to_in_progress() {
        let mut store = RoundStateStore::default();
        store.apply(&starting(1), now());
        store.apply(&status(1, Phase::InProgress), now());
        assert_eq!(store.phase(), Phase::InProgress);
        // The later first number does not re-trigger anything.
        let changes = store.apply(&called(1, "G-50"), now());
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn phases_never_move_backwards() {
        let mut store = in_progress(1, &["B-1"]);
        store.apply(&status(1, Phase::Finished), now());
        store.apply(&status(1, Phase::InProgress), now());
        assert_eq!(store.phase(), Phase::Finished);
        store.apply(&starting(1), now());
        assert_eq!(store.phase(), Phase::Finished);
    }

    #[test]
    fn win_asserted_opens_claim_window_then_round_finishes() {
        let mut store = in_progress(3, &["O-70"]);
        store.apply(
            &ServerEvent::WinAsserted(WinAssertedPayload {
                round_number: 3,
                card_id: 9,
                player_id: Some(1),
                player_name: None,
                first_claim: true,
            }),
            now(),
        );
        assert_eq!(store.phase(), Phase::BingoClaimWindow);

        store.apply(
            &ServerEvent::RoundFinished(RoundFinishedPayload {
                round_number: 3,
                winners: vec![],
            }),
            now(),
        );
        assert_eq!(store.phase(), Phase::Finished);
    }

    #[test]
    fn later_claims_do_not_reopen_window() {
        let mut store = in_progress(3, &["O-70"]);
        store.apply(
            &ServerEvent::WinAsserted(WinAssertedPayload {
                round_number: 3,
                card_id: 9,
                player_id: Some(1),
                player_name: None,
                first_claim: false,
            }),
            now(),
        );
        assert_eq!(store.phase(), Phase::InProgress);
    }

    #[test]
    fn stale_events_are_discarded() {
        let mut store = in_progress(4, &["B-2"]);
        let changes = store.apply(&called(3, "I-16"), now());
        assert!(changes.is_empty());
        assert_eq!(store.number(), 4);
        assert_eq!(values(&store), vec!["B-2"]);
        assert!(matches!(
            store.admit(&called(3, "I-16")),
            Admission::Stale { current: 4, got: 3 }
        ));
    }

    #[test]
    fn newer_round_catches_up_and_clears() {
        let mut store = in_progress(4, &["B-2", "I-17"]);
        assert!(matches!(
            store.admit(&called(5, "N-33")),
            Admission::Advance { from: 4, to: 5 }
        ));
        store.apply(&called(5, "N-33"), now());
        assert_eq!(store.number(), 5);
        assert_eq!(values(&store), vec!["N-33"]);
        assert_eq!(store.phase(), Phase::InProgress);
    }

    #[test]
    fn round_numbers_are_monotonic() {
        let mut store = RoundStateStore::default();
        let mut observed = Vec::new();
        for round in [1, 3, 2, 3, 1, 5, 4] {
            store.apply(&called(round, &format!("B-{round}")), now());
            observed.push(store.number());
        }
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(store.number(), 5);
    }

    #[test]
    fn finished_round_ignores_numbers() {
        let mut store = in_progress(1, &["B-1"]);
        store.apply(&status(1, Phase::Finished), now());
        store.apply(&called(1, "B-2"), now());
        assert_eq!(values(&store), vec!["B-1"]);
    }

    #[test]
    fn next_round_started_restarts_cycle() {
        let mut store = in_progress(1, &["B-1"]);
        store.apply(&status(1, Phase::Finished), now());
        store.apply(
            &ServerEvent::RoundStarted(RoundStartedPayload {
                round_number: 2,
                pattern: None,
                prize_amount: None,
            }),
            now(),
        );
        assert_eq!(store.number(), 2);
        assert_eq!(store.phase(), Phase::Starting);
        assert!(store.round().called_numbers.is_empty());
    }

    #[test]
    fn room_finished_is_sticky_except_for_winners() {
        let mut store = in_progress(1, &["B-1"]);
        store.apply(&ServerEvent::RoomFinished(RoomFinishedPayload::default()), now());
        assert_eq!(store.phase(), Phase::RoomFinished);

        assert_eq!(store.admit(&starting(2)), Admission::RoomClosed);
        store.apply(&starting(2), now());
        assert_eq!(store.number(), 1);
        assert_eq!(store.phase(), Phase::RoomFinished);

        let winners = vec![Winner {
            player_id: 7,
            player_name: Some("Ana".into()),
            card_id: 70,
            round_number: 1,
            prize_amount: 10.0,
        }];
        store.apply(
            &ServerEvent::RoomFinished(RoomFinishedPayload {
                winners: Some(winners.clone()),
            }),
            now(),
        );
        assert_eq!(store.winners(), winners.as_slice());
    }

    #[test]
    fn recent_numbers_newest_first_and_capped() {
        let store = in_progress(1, &["B-1", "I-16", "N-31", "G-46"]);
        let recent: Vec<String> = store.recent_numbers().into_iter().map(|n| n.value).collect();
        assert_eq!(recent, vec!["G-46", "N-31", "I-16"]);
    }

    #[test]
    fn called_number_updates_last_called_at() {
        let mut store = in_progress(1, &[]);
        let stamp = at("2026-01-01T00:05:00Z");
        store.apply(
            &ServerEvent::NumberCalled(NumberCalledPayload {
                round_number: 1,
                number: "B-3".into(),
                called_at: Some(stamp),
            }),
            now(),
        );
        assert_eq!(store.round().last_called_at, Some(stamp));
    }

    #[test]
    fn snapshot_overwrites_drifted_state() {
        let mut store = in_progress(2, &["B-7", "I-22", "N-41", "G-55"]);
        let snapshot = RoundSnapshot {
            room_id: Some(1),
            room_status: RoomStatus::Active,
            round: Some(SnapshotRound {
                number: 2,
                phase: Phase::BingoClaimWindow,
                pattern: Some("line".into()),
                prize_amount: 25.0,
                called_numbers: ["B-7", "I-22", "N-41"]
                    .iter()
                    .map(|v| CalledNumber {
                        value: (*v).into(),
                        called_at: now(),
                    })
                    .collect(),
                last_called_at: None,
            }),
            countdowns: vec![],
            winners: None,
        };
        store.apply_snapshot(&snapshot);
        assert_eq!(store.phase(), Phase::BingoClaimWindow);
        assert_eq!(values(&store), vec!["B-7", "I-22", "N-41"]);
        assert!(!store.is_called("G-55"));
    }

    #[test]
    fn snapshot_without_round_resets_to_pending() {
        let mut store = in_progress(6, &["B-7"]);
        let changes = store.apply_snapshot(&RoundSnapshot {
            room_status: RoomStatus::Active,
            ..RoundSnapshot::default()
        });
        assert_eq!(store.number(), 6);
        assert_eq!(store.phase(), Phase::Pending);
        assert!(store.round().called_numbers.is_empty());
        assert!(changes.contains(&StoreChange::PhaseChanged {
            from: Phase::InProgress,
            to: Phase::Pending
        }));
    }

    #[test]
    fn nudge_only_from_in_progress_of_same_round() {
        let mut store = in_progress(2, &["B-7"]);
        assert!(!store.nudge_claim_window(1));
        assert!(store.nudge_claim_window(2));
        assert_eq!(store.phase(), Phase::BingoClaimWindow);
        assert!(!store.nudge_claim_window(2));
    }

    #[test]
    fn begin_round_refuses_to_regress() {
        let mut store = in_progress(5, &["B-7"]);
        store.begin_round(4);
        assert_eq!(store.number(), 5);
        assert!(store.is_called("B-7"));
    }
}
