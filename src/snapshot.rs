//! Snapshot reconciliation.
//!
//! Snapshots are requested on room join and after every reconnect while a
//! room is active. Requests may complete out of order; only the result of
//! the most recently *issued* request is applied.

use tracing::debug;

use crate::protocol::{RoomId, RoundSnapshot};

/// Sequence number stamped on each snapshot request.
pub type SnapshotSeq = u64;

/// Why a snapshot was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    Join,
    Reconnect,
    /// Pushed by the server as `room-state-sync`.
    Pushed,
    Manual,
}

/// Tracks snapshot request issuance so stale completions can be dropped.
#[derive(Debug, Default)]
pub struct SnapshotReconciler {
    issued: SnapshotSeq,
    in_flight: Option<(SnapshotSeq, RoomId)>,
}

impl SnapshotReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new request. Any older in-flight request is superseded.
    pub fn issue(&mut self, room_id: RoomId, reason: ReconcileReason) -> SnapshotSeq {
        self.issued += 1;
        if let Some((old, _)) = self.in_flight {
            debug!(superseded = old, seq = self.issued, "snapshot request superseded");
        }
        self.in_flight = Some((self.issued, room_id));
        debug!(room_id, seq = self.issued, ?reason, "snapshot requested");
        self.issued
    }

    /// Record a completion. Returns `true` if `seq` is still the latest
    /// issued request for `room_id` and its result should be applied.
    pub fn accept(&mut self, seq: SnapshotSeq, room_id: RoomId) -> bool {
        match self.in_flight {
            Some((latest, room)) if latest == seq && room == room_id => {
                self.in_flight = None;
                true
            }
            _ => {
                debug!(seq, latest = self.issued, "discarding superseded snapshot");
                false
            }
        }
    }

    /// Returns `true` while the latest request has not completed.
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Abandon the in-flight request, e.g. after leaving the room.
    pub fn cancel(&mut self) {
        self.in_flight = None;
    }

    /// Returns `true` if a snapshot describes a different room than the one
    /// we are in. Snapshots without a room id are trusted.
    pub fn is_foreign(snapshot: &RoundSnapshot, room_id: RoomId) -> bool {
        snapshot.room_id.is_some_and(|id| id != room_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn latest_issued_wins_regardless_of_completion_order() {
        let mut recon = SnapshotReconciler::new();
        let first = recon.issue(1, ReconcileReason::Join);
        let second = recon.issue(1, ReconcileReason::Reconnect);

        // The newer request completes first and is applied.
        assert!(recon.accept(second, 1));
        // The older one finishing later must not undo it.
        assert!(!recon.accept(first, 1));
    }

    #[test]
    fn older_completion_before_newer_is_dropped() {
        let mut recon = SnapshotReconciler::new();
        let first = recon.issue(1, ReconcileReason::Join);
        let second = recon.issue(1, ReconcileReason::Manual);
        assert!(!recon.accept(first, 1));
        assert!(recon.is_pending());
        assert!(recon.accept(second, 1));
        assert!(!recon.is_pending());
    }

    #[test]
    fn cancelled_request_is_not_applied() {
        let mut recon = SnapshotReconciler::new();
        let seq = recon.issue(1, ReconcileReason::Join);
        recon.cancel();
        assert!(!recon.accept(seq, 1));
    }

    #[test]
    fn room_mismatch_is_rejected() {
        let mut recon = SnapshotReconciler::new();
        let seq = recon.issue(1, ReconcileReason::Join);
        assert!(!recon.accept(seq, 2));
        let snapshot = RoundSnapshot {
            room_id: Some(2),
            ..RoundSnapshot::default()
        };
        assert!(SnapshotReconciler::is_foreign(&snapshot, 1));
        assert!(!SnapshotReconciler::is_foreign(&RoundSnapshot::default(), 1));
    }
}
