//! Countdown windows anchored to absolute server-clock deadlines.
//!
//! A window is set once per event with an absolute deadline and re-derived on
//! every tick; there is no per-window timer. Expiry only clears the window.
//! It never moves the round phase, which changes on server events alone.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Interval, MissedTickBehavior};

use crate::protocol::{CountdownKind, RoundNumber};

/// One active countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownWindow {
    pub kind: CountdownKind,
    /// Deadline in server time.
    pub finish_at: DateTime<Utc>,
    /// Round the window belongs to, when the server said so.
    pub round_number: Option<RoundNumber>,
}

impl CountdownWindow {
    /// Time left at `server_now`; zero or negative once expired.
    pub fn remaining(&self, server_now: DateTime<Utc>) -> chrono::Duration {
        self.finish_at - server_now
    }
}

/// Result of one [`Countdowns::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Time left per still-active window.
    pub remaining: BTreeMap<CountdownKind, Duration>,
    /// Windows that reached zero on this tick and were cleared.
    pub expired: Vec<CountdownKind>,
}

impl TickReport {
    /// Whole seconds left per window, rounded up, for display.
    pub fn seconds(&self) -> BTreeMap<CountdownKind, u64> {
        self.remaining
            .iter()
            .map(|(kind, left)| (*kind, ceil_seconds(*left)))
            .collect()
    }
}

/// Round a remaining duration up to whole seconds, so `0.2s` shows as `1`.
pub fn ceil_seconds(left: Duration) -> u64 {
    let secs = left.as_secs();
    if left.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Up to one active window per [`CountdownKind`].
#[derive(Debug, Clone, Default)]
pub struct Countdowns {
    windows: BTreeMap<CountdownKind, CountdownWindow>,
}

impl Countdowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or replace the window for `kind`. Returns the window it replaced.
    pub fn set_window(
        &mut self,
        kind: CountdownKind,
        finish_at: DateTime<Utc>,
        round_number: Option<RoundNumber>,
    ) -> Option<CountdownWindow> {
        tracing::debug!(?kind, %finish_at, ?round_number, "countdown window set");
        self.windows.insert(
            kind,
            CountdownWindow {
                kind,
                finish_at,
                round_number,
            },
        )
    }

    /// Stop the window for `kind`. Returns `true` if one was active.
    pub fn clear_window(&mut self, kind: CountdownKind) -> bool {
        self.windows.remove(&kind).is_some()
    }

    /// Stop every window.
    pub fn clear_all(&mut self) {
        self.windows.clear();
    }

    /// The active window for `kind`, if any.
    pub fn get(&self, kind: CountdownKind) -> Option<&CountdownWindow> {
        self.windows.get(&kind)
    }

    /// Returns `true` while at least one window is active. Ticking is paused
    /// otherwise.
    pub fn is_active(&self) -> bool {
        !self.windows.is_empty()
    }

    /// Re-derive every window at `server_now`, clearing the expired ones.
    pub fn tick(&mut self, server_now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.windows.retain(|kind, window| {
            match window.remaining(server_now).to_std() {
                Ok(left) if !left.is_zero() => {
                    report.remaining.insert(*kind, left);
                    true
                }
                // Zero or negative.
                _ => {
                    report.expired.push(*kind);
                    false
                }
            }
        });
        report
    }
}

/// A tick interval that skips missed ticks instead of bursting to catch up.
pub fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
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
    use crate::clock::{Clock, ManualClock, ServerClockOffset};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn derivation_is_independent_of_local_skew() {
        // The server runs 2s ahead of this machine.
        let clock = ManualClock::new(at("2026-01-01T00:00:00Z"));
        let offset = ServerClockOffset::from_millis(2_000);
        let server_now = offset.to_server(clock.now());

        let mut countdowns = Countdowns::new();
        countdowns.set_window(
            CountdownKind::RoundStart,
            server_now + chrono::Duration::seconds(10),
            Some(1),
        );

        let report = countdowns.tick(offset.to_server(clock.now()));
        assert_eq!(
            report.remaining.get(&CountdownKind::RoundStart),
            Some(&Duration::from_secs(10))
        );

        clock.advance(chrono::Duration::milliseconds(50));
        let report = countdowns.tick(offset.to_server(clock.now()));
        let left = report.remaining[&CountdownKind::RoundStart];
        assert!(left <= Duration::from_secs(10) && left >= Duration::from_millis(9_950));
        assert_eq!(report.seconds()[&CountdownKind::RoundStart], 10);
    }

    #[test]
    fn expired_windows_are_cleared_on_tick() {
        let now = at("2026-01-01T00:00:00Z");
        let mut countdowns = Countdowns::new();
        countdowns.set_window(CountdownKind::BingoClaim, now, Some(3));
        countdowns.set_window(
            CountdownKind::RoomStart,
            now + chrono::Duration::seconds(30),
            None,
        );

        let report = countdowns.tick(now);
        assert_eq!(report.expired, vec![CountdownKind::BingoClaim]);
        assert!(countdowns.get(CountdownKind::BingoClaim).is_none());
        assert!(countdowns.is_active());
    }

    #[test]
    fn setting_same_kind_replaces() {
        let now = at("2026-01-01T00:00:00Z");
        let mut countdowns = Countdowns::new();
        assert!(countdowns
            .set_window(CountdownKind::RoundTransition, now, Some(1))
            .is_none());
        let replaced = countdowns
            .set_window(
                CountdownKind::RoundTransition,
                now + chrono::Duration::seconds(5),
                Some(1),
            )
            .unwrap();
        assert_eq!(replaced.finish_at, now);
        assert_eq!(
            countdowns
                .get(CountdownKind::RoundTransition)
                .unwrap()
                .finish_at,
            now + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn kinds_are_independent() {
        let now = at("2026-01-01T00:00:00Z");
        let mut countdowns = Countdowns::new();
        countdowns.set_window(
            CountdownKind::RoundTransition,
            now + chrono::Duration::seconds(5),
            Some(1),
        );
        countdowns.set_window(
            CountdownKind::BingoClaim,
            now + chrono::Duration::seconds(7),
            Some(1),
        );
        assert_eq!(countdowns.tick(now).remaining.len(), 2);
        assert!(countdowns.clear_window(CountdownKind::BingoClaim));
        assert!(!countdowns.clear_window(CountdownKind::BingoClaim));
        assert_eq!(countdowns.tick(now).remaining.len(), 1);
    }

    #[test]
    fn inactive_after_clear_all() {
        let now = at("2026-01-01T00:00:00Z");
        let mut countdowns = Countdowns::new();
        countdowns.set_window(
            CountdownKind::RoomStart,
            now + chrono::Duration::seconds(1),
            None,
        );
        countdowns.clear_all();
        assert!(!countdowns.is_active());
        assert_eq!(countdowns.tick(now), TickReport::default());
    }

    #[test]
    fn ceil_rounds_partial_seconds_up() {
        assert_eq!(ceil_seconds(Duration::from_millis(200)), 1);
        assert_eq!(ceil_seconds(Duration::from_secs(3)), 3);
        assert_eq!(ceil_seconds(Duration::from_millis(3001)), 4);
    }
}
