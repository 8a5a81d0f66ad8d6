//! Time and randomness sources.
//!
//! Token issuance and expiry checks never read the wall clock or the RNG
//! directly; they go through these traits so hosts can align time with the
//! application's clock and tests can drive expiry deterministically.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::{Arc, Mutex};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward (or backward, for a negative duration).
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded random integers.
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[min, max]` (inclusive).
    fn rand_range(&self, min: u32, max: u32) -> u32;
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn rand_range(&self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        rand::rngs::OsRng.gen_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared_state() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let start = clock.now();

        clock.advance(Duration::minutes(16));
        assert_eq!(other.now() - start, Duration::minutes(16));

        other.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_os_random_stays_in_range() {
        let rng = OsRandom;
        for _ in 0..1000 {
            assert!(rng.rand_range(0, 65535) <= 65535);
        }
        assert_eq!(rng.rand_range(7, 7), 7);
        assert_eq!(rng.rand_range(9, 3), 9);
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
