//! Claim orchestrator.
//!
//! Runs the optimistic "claim win" flow: local pre-validation against the
//! round state, a single in-flight submission, and reconciliation of the
//! server's verdict with per-round, per-card bookkeeping.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error_codes::ErrorCode;
use crate::protocol::{CardId, ClaimRequest, ClaimVerdictPayload, RoomId, RoundNumber};
use crate::round::RoundStateStore;

/// Why a claim was refused, either locally or by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimRejection {
    /// The card does not satisfy the round's pattern. Retryable with another card.
    #[error("card does not match the winning pattern")]
    PatternInvalid,
    /// Someone already won with this card. Other cards may still be claimed.
    #[error("card has already been claimed this round")]
    CardAlreadyClaimed,
    /// The player already holds an accepted claim this round. Blocking.
    #[error("you already have a winning claim this round")]
    PlayerAlreadyWon,
    /// The round is not in a phase that accepts claims.
    #[error("the round is not accepting claims")]
    RoundNotClaimable,
    /// Another submission is still awaiting its verdict.
    #[error("a claim is already being submitted")]
    ClaimInFlight,
    /// Any other server-side refusal.
    #[error("claim refused by server: {0}")]
    Server(ErrorCode),
}

/// Result of one `submit_claim`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The server accepted the claim.
    Accepted {
        card_id: CardId,
        round_number: RoundNumber,
    },
    /// The claim was refused. `local` is `true` when no request was sent.
    Rejected { cause: ClaimRejection, local: bool },
    /// Marked numbers the round has not called. The client's view has
    /// drifted from the server's and needs a reload.
    SyncMismatch { missing: Vec<String> },
    /// The request could not be delivered or its verdict never arrived.
    /// Nothing blocks a retry.
    TransportFailed { reason: String },
    /// The verdict targeted a round that has since been replaced.
    Superseded { round_number: RoundNumber },
}

impl ClaimOutcome {
    fn local(cause: ClaimRejection) -> Self {
        Self::Rejected { cause, local: true }
    }

    /// Returns `true` for an accepted claim.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Bookkeeping for one submission. A newer submission for the same card
/// supersedes the record rather than mutating it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRecord {
    pub request_id: Uuid,
    pub card_id: CardId,
    pub round_number: RoundNumber,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Per-round claim state.
#[derive(Debug, Default)]
pub struct ClaimOrchestrator {
    claimed_cards: HashSet<CardId>,
    player_has_won: bool,
    in_flight: Option<ClaimRecord>,
    records: Vec<ClaimRecord>,
}

impl ClaimOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cards with an accepted claim this round, sorted.
    pub fn claimed_cards(&self) -> Vec<CardId> {
        let mut cards: Vec<CardId> = self.claimed_cards.iter().copied().collect();
        cards.sort_unstable();
        cards
    }

    pub fn is_claimed(&self, card_id: CardId) -> bool {
        self.claimed_cards.contains(&card_id)
    }

    pub fn player_has_won(&self) -> bool {
        self.player_has_won
    }

    /// The submission awaiting a verdict, if any.
    pub fn in_flight(&self) -> Option<&ClaimRecord> {
        self.in_flight.as_ref()
    }

    /// Returns `true` if `request_id` is the submission currently awaiting
    /// its verdict.
    pub fn is_awaiting(&self, request_id: Uuid) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|r| r.request_id == request_id)
    }

    /// The latest record for `card_id` in the current round.
    pub fn record_for(&self, card_id: CardId) -> Option<&ClaimRecord> {
        self.records.iter().rev().find(|r| r.card_id == card_id)
    }

    /// Check every local precondition. `Err` carries the outcome to hand back
    /// without touching the network.
    pub fn precheck(
        &self,
        card_id: CardId,
        marked_numbers: &[String],
        store: &RoundStateStore,
    ) -> Result<(), ClaimOutcome> {
        if !store.phase().accepts_claims() {
            return Err(ClaimOutcome::local(ClaimRejection::RoundNotClaimable));
        }
        if self.player_has_won {
            return Err(ClaimOutcome::local(ClaimRejection::PlayerAlreadyWon));
        }
        if self.claimed_cards.contains(&card_id) {
            return Err(ClaimOutcome::local(ClaimRejection::CardAlreadyClaimed));
        }
        let missing: Vec<String> = marked_numbers
            .iter()
            .filter(|value| !store.is_called(value.trim()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(card_id, ?missing, "marked numbers were never called");
            return Err(ClaimOutcome::SyncMismatch { missing });
        }
        if self.in_flight.is_some() {
            return Err(ClaimOutcome::local(ClaimRejection::ClaimInFlight));
        }
        Ok(())
    }

    /// Pre-validate and, if allowed, build the request and mark it in flight.
    pub fn begin(
        &mut self,
        room_id: RoomId,
        card_id: CardId,
        marked_numbers: Vec<String>,
        store: &RoundStateStore,
        now: DateTime<Utc>,
    ) -> Result<ClaimRequest, ClaimOutcome> {
        self.precheck(card_id, &marked_numbers, store)?;
        let record = ClaimRecord {
            request_id: Uuid::new_v4(),
            card_id,
            round_number: store.number(),
            status: ClaimStatus::Pending,
            submitted_at: now,
        };
        debug!(card_id, round = record.round_number, request_id = %record.request_id, "claim submitted");
        let request = ClaimRequest {
            request_id: record.request_id,
            room_id,
            round_number: record.round_number,
            card_id,
            marked_numbers,
        };
        self.records.push(record.clone());
        self.in_flight = Some(record);
        Ok(request)
    }

    /// Apply a server verdict. Returns `None` if it answers no submission
    /// of this round.
    ///
    /// A verdict for a round older than `current_round` is discarded without
    /// touching this round's bookkeeping. A late verdict for a submission
    /// that already timed out still updates the bookkeeping.
    pub fn resolve(
        &mut self,
        verdict: &ClaimVerdictPayload,
        current_round: RoundNumber,
    ) -> Option<ClaimOutcome> {
        if self.is_awaiting(verdict.request_id) {
            self.in_flight = None;
            if verdict.round_number < current_round {
                info!(
                    round = verdict.round_number,
                    current_round, "discarding verdict for superseded round"
                );
                return Some(ClaimOutcome::Superseded {
                    round_number: verdict.round_number,
                });
            }
        } else {
            let abandoned = self
                .records
                .iter()
                .any(|r| r.request_id == verdict.request_id && r.status == ClaimStatus::Pending);
            if !abandoned || verdict.round_number < current_round {
                debug!(request_id = %verdict.request_id, "verdict for unknown claim");
                return None;
            }
            info!(request_id = %verdict.request_id, "late verdict for a timed-out claim");
        }

        if verdict.accepted {
            self.set_status(verdict.request_id, ClaimStatus::Accepted);
            self.claimed_cards.insert(verdict.card_id);
            self.player_has_won = true;
            info!(card_id = verdict.card_id, round = verdict.round_number, "claim accepted");
            return Some(ClaimOutcome::Accepted {
                card_id: verdict.card_id,
                round_number: verdict.round_number,
            });
        }

        self.set_status(verdict.request_id, ClaimStatus::Rejected);
        let cause = verdict
            .code
            .map_or(ClaimRejection::Server(ErrorCode::InternalError), |code| {
                code.claim_rejection()
            });
        match cause {
            ClaimRejection::CardAlreadyClaimed => {
                self.claimed_cards.insert(verdict.card_id);
            }
            ClaimRejection::PlayerAlreadyWon => self.player_has_won = true,
            _ => {}
        }
        warn!(card_id = verdict.card_id, %cause, "claim rejected");
        Some(ClaimOutcome::Rejected {
            cause,
            local: false,
        })
    }

    /// The in-flight submission failed to send or timed out. Clears the
    /// re-entrancy guard; the record stays pending so a verdict that still
    /// arrives this round is applied.
    pub fn transport_failed(&mut self, reason: impl Into<String>) -> Option<ClaimOutcome> {
        let pending = self.in_flight.take()?;
        let reason = reason.into();
        warn!(card_id = pending.card_id, %reason, "claim transport failed");
        Some(ClaimOutcome::TransportFailed { reason })
    }

    /// Clear per-round bookkeeping. The in-flight marker is kept; its verdict
    /// will resolve as superseded.
    pub fn reset_for_round(&mut self) {
        self.claimed_cards.clear();
        self.player_has_won = false;
        let in_flight = self.in_flight.as_ref().map(|r| r.request_id);
        self.records.retain(|r| Some(r.request_id) == in_flight);
    }

    fn set_status(&mut self, request_id: Uuid, status: ClaimStatus) {
        if let Some(record) = self.records.iter_mut().find(|r| r.request_id == request_id) {
            record.status = status;
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
        NumberCalledPayload, RoundStartingPayload, ServerEvent,
    };

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store(round: RoundNumber, numbers: &[&str]) -> RoundStateStore {
        let mut store = RoundStateStore::default();
        store.apply(
            &ServerEvent::RoundStarting(RoundStartingPayload {
                round_number: round,
                pattern: None,
                prize_amount: None,
                seconds_remaining: Some(5.0),
                finish_at: None,
            }),
            now(),
        );
        for n in numbers {
            store.apply(
                &ServerEvent::NumberCalled(NumberCalledPayload {
                    round_number: round,
                    number: (*n).into(),
                    called_at: None,
                }),
                now(),
            );
        }
        store
    }

    fn marked(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn verdict(req: &ClaimRequest, accepted: bool, code: Option<ErrorCode>) -> ClaimVerdictPayload {
        ClaimVerdictPayload {
            request_id: req.request_id,
            round_number: req.round_number,
            card_id: req.card_id,
            accepted,
            code,
            message: None,
        }
    }

    #[test]
    fn accepted_claim_blocks_other_cards() {
        let store = store(2, &["B-7", "I-22"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims
            .begin(1, 10, marked(&["B-7"]), &store, now())
            .unwrap();
        let outcome = claims.resolve(&verdict(&req, true, None), 2).unwrap();
        assert!(outcome.is_accepted());
        assert!(claims.is_claimed(10));

        let second = claims.begin(1, 11, marked(&["I-22"]), &store, now());
        assert_eq!(
            second.unwrap_err(),
            ClaimOutcome::Rejected {
                cause: ClaimRejection::PlayerAlreadyWon,
                local: true
            }
        );
    }

    #[test]
    fn card_already_claimed_is_recorded_but_not_blocking() {
        let store = store(2, &["B-7", "I-22"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims
            .begin(1, 10, marked(&["B-7"]), &store, now())
            .unwrap();
        let outcome = claims
            .resolve(&verdict(&req, false, Some(ErrorCode::CardAlreadyClaimed)), 2)
            .unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Rejected {
                cause: ClaimRejection::CardAlreadyClaimed,
                local: false
            }
        );
        assert!(claims.is_claimed(10));
        assert!(!claims.player_has_won());

        assert!(claims.begin(1, 11, marked(&["I-22"]), &store, now()).is_ok());
        assert!(matches!(
            claims.begin(1, 10, marked(&["I-22"]), &store, now()),
            Err(ClaimOutcome::Rejected { .. })
        ));
    }

    #[test]
    fn pattern_invalid_is_retryable() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.resolve(&verdict(&req, false, Some(ErrorCode::InvalidPattern)), 1);
        assert!(!claims.is_claimed(10));
        assert!(claims.begin(1, 10, marked(&["B-7"]), &store, now()).is_ok());
    }

    #[test]
    fn player_already_won_from_server_blocks() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.resolve(&verdict(&req, false, Some(ErrorCode::PlayerAlreadyWon)), 1);
        assert!(claims.player_has_won());
        assert!(claims.begin(1, 12, marked(&["B-7"]), &store, now()).is_err());
    }

    #[test]
    fn unmarked_called_numbers_is_sync_mismatch() {
        let store = store(1, &["B-7"]);
        let claims = ClaimOrchestrator::new();
        let err = claims
            .precheck(10, &marked(&["B-7", "O-75"]), &store)
            .unwrap_err();
        assert_eq!(
            err,
            ClaimOutcome::SyncMismatch {
                missing: vec!["O-75".into()]
            }
        );
    }

    #[test]
    fn only_one_claim_in_flight() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        assert_eq!(
            claims.begin(1, 11, marked(&["B-7"]), &store, now()).unwrap_err(),
            ClaimOutcome::Rejected {
                cause: ClaimRejection::ClaimInFlight,
                local: true
            }
        );
    }

    #[test]
    fn claims_refused_outside_claimable_phase() {
        let store = store(1, &[]);
        let claims = ClaimOrchestrator::new();
        assert_eq!(
            claims.precheck(10, &[], &store).unwrap_err(),
            ClaimOutcome::Rejected {
                cause: ClaimRejection::RoundNotClaimable,
                local: true
            }
        );
    }

    #[test]
    fn transport_failure_sets_no_block() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        let outcome = claims.transport_failed("socket closed").unwrap();
        assert!(matches!(outcome, ClaimOutcome::TransportFailed { .. }));
        assert!(claims.in_flight().is_none());
        assert!(!claims.player_has_won());
        assert!(claims.begin(1, 10, marked(&["B-7"]), &store, now()).is_ok());
    }

    #[test]
    fn late_verdict_after_timeout_records_win() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.transport_failed("no verdict before timeout");
        assert!(!claims.is_awaiting(req.request_id));

        let outcome = claims.resolve(&verdict(&req, true, None), 1).unwrap();
        assert!(outcome.is_accepted());
        assert!(claims.player_has_won());
        assert!(claims.is_claimed(10));
        assert_eq!(claims.record_for(10).unwrap().status, ClaimStatus::Accepted);

        // A second copy of the same verdict is no longer pending.
        assert!(claims.resolve(&verdict(&req, true, None), 1).is_none());
    }

    #[test]
    fn late_verdict_leaves_newer_submission_in_flight() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let old = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.transport_failed("no verdict before timeout");
        let new = claims.begin(1, 11, marked(&["B-7"]), &store, now()).unwrap();

        let outcome = claims
            .resolve(&verdict(&old, false, Some(ErrorCode::CardAlreadyClaimed)), 1)
            .unwrap();
        assert!(matches!(outcome, ClaimOutcome::Rejected { local: false, .. }));
        assert!(claims.is_claimed(10));
        assert!(claims.is_awaiting(new.request_id));
    }

    #[test]
    fn late_verdict_from_previous_round_is_dropped() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.transport_failed("disconnected");
        claims.reset_for_round();
        assert!(claims.resolve(&verdict(&req, true, None), 2).is_none());
        assert!(!claims.player_has_won());
    }

    #[test]
    fn reset_keeps_in_flight_and_verdict_is_superseded() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        claims.reset_for_round();
        assert!(claims.in_flight().is_some());

        let outcome = claims.resolve(&verdict(&req, true, None), 2).unwrap();
        assert_eq!(outcome, ClaimOutcome::Superseded { round_number: 1 });
        assert!(!claims.is_claimed(10));
        assert!(!claims.player_has_won());
    }

    #[test]
    fn unknown_verdict_is_ignored() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let mut req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        req.request_id = Uuid::new_v4();
        assert!(claims.resolve(&verdict(&req, true, None), 1).is_none());
        assert!(claims.in_flight().is_some());
    }

    #[test]
    fn records_track_status() {
        let store = store(1, &["B-7"]);
        let mut claims = ClaimOrchestrator::new();
        let req = claims.begin(1, 10, marked(&["B-7"]), &store, now()).unwrap();
        assert_eq!(claims.record_for(10).unwrap().status, ClaimStatus::Pending);
        claims.resolve(&verdict(&req, true, None), 1);
        assert_eq!(claims.record_for(10).unwrap().status, ClaimStatus::Accepted);
    }
}
