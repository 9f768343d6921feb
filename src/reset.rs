//! Reset coordinator.
//!
//! Decides whether a reset for a given round should run now, is redundant,
//! or has to wait for a reset of a different round to finish. The session
//! performs the actual clearing between [`ResetCoordinator::begin`] and
//! [`ResetCoordinator::finish`], so nothing observes a half-reset state.

use tracing::debug;

use crate::protocol::RoundNumber;

/// What the caller should do with a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    /// Perform the reset now, then call [`ResetCoordinator::finish`].
    Run,
    /// A reset for this round, or a later one, already ran or is running.
    AlreadyDone,
    /// A reset for another round is in progress; retry shortly.
    Queued,
}

#[derive(Debug, Default)]
pub struct ResetCoordinator {
    last_reset_round: Option<RoundNumber>,
    running: Option<RoundNumber>,
    queued: Option<RoundNumber>,
}

impl ResetCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The round of the most recent reset that started.
    pub fn last_reset_round(&self) -> Option<RoundNumber> {
        self.last_reset_round
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Request a reset for `round`. The reset marker only moves forward, so
    /// a request for an older round never clears the live one.
    pub fn begin(&mut self, round: RoundNumber) -> ResetDecision {
        if let Some(last) = self.last_reset_round.filter(|last| round <= *last) {
            debug!(round, last, "reset already performed");
            return ResetDecision::AlreadyDone;
        }
        if let Some(running) = self.running {
            debug!(round, running, "reset in progress, queueing");
            // Only the newest queued round matters.
            if self.queued.is_none_or(|q| round > q) {
                self.queued = Some(round);
            }
            return ResetDecision::Queued;
        }
        self.running = Some(round);
        self.last_reset_round = Some(round);
        ResetDecision::Run
    }

    /// Mark the running reset complete. Returns a queued round to retry.
    pub fn finish(&mut self) -> Option<RoundNumber> {
        self.running = None;
        let last = self.last_reset_round;
        self.queued.take().filter(|q| last.is_none_or(|last| *q > last))
    }

    /// Forget every marker, e.g. after leaving the room.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn second_call_for_same_round_is_noop() {
        let mut reset = ResetCoordinator::new();
        assert_eq!(reset.begin(3), ResetDecision::Run);
        assert_eq!(reset.begin(3), ResetDecision::AlreadyDone);
        assert_eq!(reset.finish(), None);
        assert_eq!(reset.begin(3), ResetDecision::AlreadyDone);
    }

    #[test]
    fn different_round_waits_for_running_reset() {
        let mut reset = ResetCoordinator::new();
        assert_eq!(reset.begin(3), ResetDecision::Run);
        assert_eq!(reset.begin(4), ResetDecision::Queued);
        assert_eq!(reset.finish(), Some(4));
        assert_eq!(reset.begin(4), ResetDecision::Run);
        assert_eq!(reset.finish(), None);
        assert_eq!(reset.last_reset_round(), Some(4));
    }

    #[test]
    fn newest_queued_round_wins() {
        let mut reset = ResetCoordinator::new();
        reset.begin(3);
        reset.begin(5);
        reset.begin(4);
        assert_eq!(reset.finish(), Some(5));
    }

    #[test]
    fn older_round_never_resets_again() {
        let mut reset = ResetCoordinator::new();
        assert_eq!(reset.begin(4), ResetDecision::Run);
        reset.finish();
        assert_eq!(reset.begin(2), ResetDecision::AlreadyDone);
        assert_eq!(reset.begin(4), ResetDecision::AlreadyDone);
        assert_eq!(reset.last_reset_round(), Some(4));
        assert_eq!(reset.begin(5), ResetDecision::Run);
    }

    #[test]
    fn clear_forgets_markers() {
        let mut reset = ResetCoordinator::new();
        reset.begin(2);
        reset.finish();
        reset.clear();
        assert_eq!(reset.begin(2), ResetDecision::Run);
    }
}
