//! # Clock Contract
//!
//! The engine takes `now` as an explicit parameter; this trait is where
//! the service gets it. Keeping the clock behind a seam makes expiry
//! behavior fully testable - tests drive a [`ManualClock`] past a
//! subscription window instead of sleeping.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Time source for expiry comparisons.
///
/// Must be monotonic enough that expiry checks are stable within a
/// session; wall-clock UTC satisfies that here.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: reads the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            current: RwLock::new(start),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write().expect("clock lock poisoned");
        *current = *current + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::days(31));
        assert_eq!(clock.now(), start + Duration::days(31));
    }
}
