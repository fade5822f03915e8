//! # Injectable monotonic time source.
//!
//! The consumer loop snapshots [`Clock::now`] **once per iteration** and uses
//! that reading for every task in the batch; relative ordering inside a batch
//! stays stable and the clock is not hammered per task.
//!
//! Two implementations are provided:
//! - [`MonotonicClock`] — wall-independent, anchored to an [`Instant`] taken
//!   when the loop is built (default);
//! - [`ManualClock`] — an atomic counter advanced explicitly, for
//!   deterministic tests of scheduling math.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time provider. Readings are nanoseconds since an arbitrary
/// per-clock epoch and must never decrease.
pub trait Clock: Send + Sync + 'static {
    /// Current reading in nanoseconds since this clock's epoch.
    fn now(&self) -> u64;
}

/// Default clock: nanoseconds elapsed since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        // Saturates after ~584 years of loop uptime.
        self.origin.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
    }
}

/// Test clock advanced by hand.
///
/// # Example
/// ```
/// use ringloop::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// assert_eq!(clock.now(), 0);
/// clock.advance(Duration::from_millis(10));
/// assert_eq!(clock.now(), 10_000_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let nanos = d.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.nanos.fetch_add(nanos, Ordering::Release);
    }

    /// Sets an absolute reading. Must never move backwards.
    pub fn set(&self, since_epoch: Duration) {
        let nanos = since_epoch.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a, "clock went backwards: {a} -> {b}");
    }

    #[test]
    fn test_manual_clock_is_explicit() {
        let clock = ManualClock::new();
        let before = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.now(), before, "manual clock moved on its own");

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), before + 1_000_000_000);
    }
}
