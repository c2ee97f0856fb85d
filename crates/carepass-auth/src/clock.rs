//! Injectable time source.
//!
//! Token expiry, key cache freshness and session lifetimes all read "now"
//! through [`Clock`] so tests can pin or advance time.

use arc_swap::ArcSwap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: ArcSwap<OffsetDateTime>,
}

impl FixedClock {
    /// Creates a clock pinned at `now`.
    #[must_use]
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: ArcSwap::from_pointee(now),
        }
    }

    /// Pins the clock at a new instant.
    pub fn set(&self, now: OffsetDateTime) {
        self.now.store(Arc::new(now));
    }

    /// Moves the clock forward (or backward for negative durations).
    pub fn advance(&self, by: time::Duration) {
        let next = **self.now.load() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        **self.now.load()
    }
}

/// Converts a configuration duration into a `time::Duration`, saturating on overflow.
#[must_use]
pub fn to_time_duration(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(datetime!(2026-01-01 00:00 UTC));
        clock.advance(time::Duration::minutes(5));
        assert_eq!(clock.now(), datetime!(2026-01-01 00:05 UTC));

        clock.set(datetime!(2025-06-01 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-06-01 12:00 UTC));
    }

    #[test]
    fn test_to_time_duration() {
        assert_eq!(
            to_time_duration(std::time::Duration::from_secs(300)),
            time::Duration::minutes(5)
        );
        assert_eq!(
            to_time_duration(std::time::Duration::MAX),
            time::Duration::MAX
        );
    }
}
