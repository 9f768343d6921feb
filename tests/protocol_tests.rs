#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the bingo event stream.
//!
//! Decodes JSON fixtures shaped like real server output, checks the exact
//! encoding of client messages, and pins `ErrorCode` SCREAMING_SNAKE_CASE
//! names.

use bingo_round_sync::error_codes::ErrorCode;
use bingo_round_sync::protocol::{
    ClaimRequest, ClientMessage, CountdownKind, EventKind, Phase, RoomRef, RoomStatus,
    RoundSnapshot, ServerEvent,
};
use bingo_round_sync::BingoSyncError;
use chrono::{DateTime, Utc};
use serde_json::json;

fn decode(value: serde_json::Value) -> ServerEvent {
    ServerEvent::decode(&value.to_string()).expect("decode")
}

fn decode_err(value: serde_json::Value) -> BingoSyncError {
    ServerEvent::decode(&value.to_string()).expect_err("expected malformed event")
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

// ════════════════════════════════════════════════════════════════════
// Inbound fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn round_starting_fixture() {
    let event = decode(json!({
        "event": "round-starting",
        "data": {
            "roundNumber": 3,
            "pattern": "full_house",
            "prizeAmount": 50.0,
            "secondsRemaining": 15
        }
    }));
    let ServerEvent::RoundStarting(p) = &event else {
        panic!("expected RoundStarting, got {event:?}");
    };
    assert_eq!(p.round_number, 3);
    assert_eq!(p.pattern.as_deref(), Some("full_house"));
    assert_eq!(p.prize_amount, Some(50.0));
    let now = ts("2026-03-01T12:00:00Z");
    assert_eq!(
        p.countdown().deadline(now),
        Some(ts("2026-03-01T12:00:15Z"))
    );
    assert_eq!(event.kind(), EventKind::RoundStarting);
    assert_eq!(event.round_number(), Some(3));
}

#[test]
fn absolute_deadline_wins_over_seconds() {
    let event = decode(json!({
        "event": "bingo-claim-countdown",
        "data": {
            "roundNumber": 2,
            "secondsRemaining": 99,
            "finishAt": "2026-03-01T12:00:05Z"
        }
    }));
    let ServerEvent::BingoClaimCountdown(p) = event else {
        panic!("expected BingoClaimCountdown");
    };
    assert_eq!(
        p.deadline(ts("2026-03-01T12:00:00Z")),
        Some(ts("2026-03-01T12:00:05Z"))
    );
}

#[test]
fn room_start_countdown_is_unscoped() {
    let event = decode(json!({
        "event": "room-start-countdown",
        "data": { "secondsRemaining": 120 }
    }));
    assert_eq!(event.round_number(), None);
    assert!(!CountdownKind::RoomStart.is_round_scoped());
    assert!(CountdownKind::BingoClaim.is_round_scoped());
}

#[test]
fn number_called_without_timestamp() {
    let event = decode(json!({
        "event": "number-called",
        "data": { "roundNumber": 1, "number": "G-53" }
    }));
    let ServerEvent::NumberCalled(p) = event else {
        panic!("expected NumberCalled");
    };
    assert_eq!(p.number, "G-53");
    assert_eq!(p.called_at, None);
}

#[test]
fn win_asserted_defaults_to_first_claim() {
    let event = decode(json!({
        "event": "win-asserted",
        "data": { "roundNumber": 4, "cardId": 812, "playerName": "ada" }
    }));
    let ServerEvent::WinAsserted(p) = event else {
        panic!("expected WinAsserted");
    };
    assert!(p.first_claim);
    assert_eq!(p.card_id, 812);
    assert_eq!(p.player_id, None);
}

#[test]
fn events_without_data_decode() {
    assert!(matches!(
        decode(json!({ "event": "room-pending" })),
        ServerEvent::RoomPending(_)
    ));
    assert!(matches!(
        decode(json!({ "event": "room-finished", "data": null })),
        ServerEvent::RoomFinished(ref p) if p.winners.is_none()
    ));
    assert!(matches!(
        decode(json!({ "event": "round-countdown-stopped" })),
        ServerEvent::RoundCountdownStopped(ref p) if p.kind.is_none()
    ));
}

#[test]
fn room_state_sync_fixture() {
    let event = decode(json!({
        "event": "room-state-sync",
        "data": {
            "roomId": 42,
            "roomStatus": "active",
            "round": {
                "number": 6,
                "phase": "bingo_claim_window",
                "pattern": "line",
                "prizeAmount": 12.5,
                "calledNumbers": [
                    { "value": "B-1", "calledAt": "2026-03-01T12:00:00Z" },
                    { "value": "I-30", "calledAt": "2026-03-01T12:00:04Z" }
                ]
            },
            "countdowns": [
                { "kind": "bingo_claim", "finishAt": "2026-03-01T12:00:20Z" }
            ],
            "winners": [
                { "playerId": 9, "cardId": 3, "roundNumber": 5, "prizeAmount": 12.5 }
            ]
        }
    }));
    let ServerEvent::RoomStateSync(snapshot) = &event else {
        panic!("expected RoomStateSync");
    };
    assert_eq!(snapshot.room_id, Some(42));
    assert_eq!(snapshot.room_status, RoomStatus::Active);
    let round = snapshot.round.as_ref().unwrap();
    assert_eq!(round.phase, Phase::BingoClaimWindow);
    assert_eq!(round.called_numbers.len(), 2);
    assert_eq!(snapshot.countdowns[0].kind, CountdownKind::BingoClaim);
    assert_eq!(snapshot.winners.as_ref().unwrap()[0].player_name, None);
    assert_eq!(event.round_number(), Some(6));
}

#[test]
fn claim_verdict_fixture() {
    let event = decode(json!({
        "event": "claim-verdict",
        "data": {
            "requestId": "00000000-0000-0000-0000-00000000002a",
            "roundNumber": 2,
            "cardId": 17,
            "accepted": false,
            "code": "CARD_ALREADY_CLAIMED",
            "message": "too slow"
        }
    }));
    let ServerEvent::ClaimVerdict(p) = event else {
        panic!("expected ClaimVerdict");
    };
    assert_eq!(p.request_id, uuid::Uuid::from_u128(42));
    assert!(!p.accepted);
    assert_eq!(p.code, Some(ErrorCode::CardAlreadyClaimed));
}

#[test]
fn winners_carrying_events() {
    let with = decode(json!({
        "event": "room-status-updated",
        "data": { "status": "finished", "winners": [] }
    }));
    assert!(with.carries_winners());
    let without = decode(json!({
        "event": "room-status-updated",
        "data": { "status": "active" }
    }));
    assert!(!without.carries_winners());
}

// ════════════════════════════════════════════════════════════════════
// Malformed frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn malformed_frames_are_rejected() {
    let cases = [
        json!({ "event": "number-called", "data": { "number": "B-7" } }),
        json!({ "event": "number-called", "data": { "roundNumber": 2, "number": "" } }),
        json!({ "event": "round-finished", "data": { "roundNumber": 0 } }),
        json!({ "event": "round-start-countdown", "data": { "roundNumber": 2 } }),
        json!({ "event": "round-status-changed", "data": { "roundNumber": 2, "status": "room_finished" } }),
        json!({ "event": "round-status-changed", "data": { "roundNumber": 2, "status": "paused" } }),
        json!({ "event": "lobby-joined", "data": {} }),
        json!({ "data": {} }),
    ];
    for case in cases {
        let err = decode_err(case.clone());
        assert!(
            matches!(err, BingoSyncError::MalformedEvent { .. }),
            "{case} produced {err:?}"
        );
    }
}

#[test]
fn non_finite_seconds_are_rejected() {
    // JSON has no NaN literal; the closest a server can send is a huge value.
    let huge = ServerEvent::decode(
        r#"{"event":"round-start-countdown","data":{"roundNumber":1,"secondsRemaining":1e999}}"#,
    );
    assert!(huge.is_err());
}

#[test]
fn snapshot_with_empty_number_is_rejected() {
    let err = decode_err(json!({
        "event": "room-state-sync",
        "data": {
            "round": {
                "number": 1,
                "phase": "in_progress",
                "calledNumbers": [{ "value": " ", "calledAt": "2026-03-01T12:00:00Z" }]
            }
        }
    }));
    assert!(err.to_string().contains("room-state-sync"));
}

// ════════════════════════════════════════════════════════════════════
// Outbound messages
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_and_leave_encoding() {
    let join = serde_json::to_value(ClientMessage::JoinRoom(RoomRef { room_id: 42 })).unwrap();
    assert_eq!(join, json!({ "event": "join-room", "data": { "roomId": 42 } }));

    let leave = serde_json::to_value(ClientMessage::LeaveRoom(RoomRef { room_id: 42 })).unwrap();
    assert_eq!(leave, json!({ "event": "leave-room", "data": { "roomId": 42 } }));
}

#[test]
fn submit_claim_encoding() {
    let msg = ClientMessage::SubmitClaim(ClaimRequest {
        request_id: uuid::Uuid::from_u128(7),
        room_id: 42,
        round_number: 3,
        card_id: 17,
        marked_numbers: vec!["B-1".into(), "I-16".into()],
    });
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(
        value,
        json!({
            "event": "submit-claim",
            "data": {
                "requestId": "00000000-0000-0000-0000-000000000007",
                "roomId": 42,
                "roundNumber": 3,
                "cardId": 17,
                "markedNumbers": ["B-1", "I-16"]
            }
        })
    );
    let back: ClientMessage = serde_json::from_value(value).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn encode_then_decode_server_event() {
    let event = decode(json!({
        "event": "round-cleanup",
        "data": { "roundNumber": 8 }
    }));
    assert_eq!(ServerEvent::decode(&event.encode().unwrap()).unwrap(), event);
}

// ════════════════════════════════════════════════════════════════════
// Enums
// ════════════════════════════════════════════════════════════════════

#[test]
fn phase_order_is_progression_order() {
    let phases = [
        Phase::Pending,
        Phase::Starting,
        Phase::InProgress,
        Phase::BingoClaimWindow,
        Phase::Finished,
        Phase::RoomFinished,
    ];
    assert!(phases.windows(2).all(|w| w[0] < w[1]));
    assert!(Phase::InProgress.accepts_claims());
    assert!(Phase::BingoClaimWindow.accepts_claims());
    assert!(!Phase::Finished.accepts_claims());
}

#[test]
fn event_kind_wire_names_match_serde() {
    let event = decode(json!({
        "event": "round-transition-countdown",
        "data": { "roundNumber": 2, "secondsRemaining": 5 }
    }));
    let kind = event.kind();
    assert_eq!(kind.as_str(), "round-transition-countdown");
    assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
    assert_eq!(EventKind::from_wire("join-room"), None);
}

#[test]
fn error_codes_are_screaming_snake_case() {
    let cases = [
        (ErrorCode::Unauthorized, "UNAUTHORIZED"),
        (ErrorCode::TokenExpired, "TOKEN_EXPIRED"),
        (ErrorCode::InvalidPattern, "INVALID_PATTERN"),
        (ErrorCode::CardAlreadyClaimed, "CARD_ALREADY_CLAIMED"),
        (ErrorCode::PlayerAlreadyWon, "PLAYER_ALREADY_WON"),
        (ErrorCode::NumbersNotCalled, "NUMBERS_NOT_CALLED"),
        (ErrorCode::RateLimitExceeded, "RATE_LIMIT_EXCEEDED"),
    ];
    for (code, name) in cases {
        assert_eq!(serde_json::to_value(code).unwrap(), json!(name));
        let back: ErrorCode = serde_json::from_value(json!(name)).unwrap();
        assert_eq!(back, code);
    }
}

#[test]
fn snapshot_defaults_for_missing_fields() {
    let snapshot: RoundSnapshot = serde_json::from_value(json!({})).unwrap();
    assert_eq!(snapshot.room_id, None);
    assert_eq!(snapshot.room_status, RoomStatus::Waiting);
    assert!(snapshot.round.is_none());
    assert!(snapshot.countdowns.is_empty());
}
