//! Local time sources and the server clock offset.
//!
//! Every countdown and "time since last call" value is computed in server
//! time: `server_now = local_now + offset`. The offset is measured once per
//! session (and optionally again after a reconnect); it is never adjusted per
//! event.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// A source of "now" for the engine.
pub trait Clock: Send + Sync + 'static {
    /// The current local wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Move the clock forward (or backward, for negative values).
    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::AcqRel);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default()
    }
}

/// Measured difference between the server's clock and the local clock
/// (`server - local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerClockOffset {
    pub offset_millis: i64,
}

impl ServerClockOffset {
    /// An explicit offset.
    pub fn from_millis(offset_millis: i64) -> Self {
        Self { offset_millis }
    }

    /// Estimate the offset from one server time sample.
    ///
    /// The sample is assumed to have been taken halfway between
    /// `requested_at` and `received_at` (local times).
    pub fn measure(
        requested_at: DateTime<Utc>,
        server_time: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let round_trip = (received_at - requested_at).num_milliseconds().max(0);
        let midpoint = requested_at.timestamp_millis() + round_trip / 2;
        Self {
            offset_millis: server_time.timestamp_millis() - midpoint,
        }
    }

    /// Convert a local instant to server time.
    pub fn to_server(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        shift(local, self.offset_millis)
    }

    /// Convert a server instant to local time.
    pub fn to_local(&self, server: DateTime<Utc>) -> DateTime<Utc> {
        shift(server, self.offset_millis.saturating_neg())
    }
}

/// `at + millis`, clamped to the representable range.
fn shift(at: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
    chrono::Duration::try_milliseconds(millis)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(if millis < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at("2026-01-01T00:00:00Z"));
        clock.advance(chrono::Duration::milliseconds(1500));
        assert_eq!(clock.now(), at("2026-01-01T00:00:01.500Z"));
        clock.set(at("2026-02-01T00:00:00Z"));
        assert_eq!(clock.now(), at("2026-02-01T00:00:00Z"));
    }

    #[test]
    fn measure_uses_midpoint() {
        // Request took 200 ms; the server said 10 s ahead of the midpoint.
        let offset = ServerClockOffset::measure(
            at("2026-01-01T00:00:00Z"),
            at("2026-01-01T00:00:10.100Z"),
            at("2026-01-01T00:00:00.200Z"),
        );
        assert_eq!(offset.offset_millis, 10_000);
    }

    #[test]
    fn conversions_are_inverse() {
        let offset = ServerClockOffset::from_millis(-2_500);
        let local = at("2026-01-01T12:00:00Z");
        assert_eq!(offset.to_local(offset.to_server(local)), local);
        assert_eq!(offset.to_server(local), at("2026-01-01T11:59:57.500Z"));
    }

    #[test]
    fn extreme_offsets_clamp() {
        let local = at("2026-01-01T12:00:00Z");
        let ahead = ServerClockOffset::from_millis(i64::MAX);
        assert_eq!(ahead.to_server(local), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ahead.to_local(local), DateTime::<Utc>::MIN_UTC);
        let behind = ServerClockOffset::from_millis(i64::MIN);
        assert_eq!(behind.to_server(local), DateTime::<Utc>::MIN_UTC);
        assert_eq!(behind.to_local(local), DateTime::<Utc>::MAX_UTC);
    }
}
