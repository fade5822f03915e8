//! # Wait strategies for the idle consumer.
//!
//! When an iteration finds no work, the consumer asks its [`WaitStrategy`]
//! how to idle. Producers call [`wake`](WaitStrategy::wake) after publishing;
//! [`shutdown`](crate::EventLoop::shutdown) calls it after raising the alert
//! flag, so a parked consumer observes the transition promptly.
//!
//! ## Built-ins
//! - [`BusySpin`] — lowest latency, burns a core;
//! - [`Yielding`] — spins briefly, then yields the time slice;
//! - [`Parking`] — blocks on a condvar with a bounded timeout (default).
//!
//! The loop re-checks its state between idle rounds, so any strategy that
//! returns within a bounded time observes shutdown promptly; `Parking` is
//! additionally woken explicitly.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How the consumer thread idles when no sequence is available.
pub trait WaitStrategy: Send + Sync + 'static {
    /// Idle for one round. `round` counts consecutive empty iterations and
    /// resets whenever work is found; strategies may escalate on it.
    ///
    /// Must return within a bounded time so the loop can notice shutdown.
    fn idle(&self, round: u32);

    /// Signal that new work may be available (or that the loop must wake to
    /// observe shutdown). Called from producer threads; must be cheap and
    /// must never block.
    fn wake(&self);
}

/// Busy-spin: never sleeps, never yields.
#[derive(Debug, Default)]
pub struct BusySpin;

impl WaitStrategy for BusySpin {
    fn idle(&self, _round: u32) {
        std::hint::spin_loop();
    }

    fn wake(&self) {}
}

/// Spin a few rounds, then yield the time slice.
#[derive(Debug)]
pub struct Yielding {
    spin_rounds: u32,
}

impl Yielding {
    #[must_use]
    pub fn new(spin_rounds: u32) -> Self {
        Self { spin_rounds }
    }
}

impl Default for Yielding {
    /// 100 spin rounds before the first yield.
    fn default() -> Self {
        Self::new(100)
    }
}

impl WaitStrategy for Yielding {
    fn idle(&self, round: u32) {
        if round < self.spin_rounds {
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }

    fn wake(&self) {}
}

/// Park on a condvar with a bounded timeout.
///
/// A signal flag under the mutex makes wake-ups lost between the consumer's
/// "no work" check and its park call impossible: `wake` sets the flag, and
/// `idle` consumes it instead of sleeping.
#[derive(Debug)]
pub struct Parking {
    timeout: Duration,
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl Parking {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            signaled: Mutex::new(false),
            cv: Condvar::new(),
        }
    }
}

impl Default for Parking {
    /// 1ms park timeout: bounded shutdown-observation latency even if a wake
    /// is somehow missed.
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl WaitStrategy for Parking {
    fn idle(&self, _round: u32) {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.cv.wait_for(&mut signaled, self.timeout);
        }
        *signaled = false;
    }

    fn wake(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_parking_wakes_promptly() {
        let strategy = Arc::new(Parking::new(Duration::from_secs(5)));
        let s2 = Arc::clone(&strategy);

        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            s2.wake();
        });

        let start = Instant::now();
        strategy.idle(0);
        let waited = start.elapsed();
        waker.join().unwrap();

        assert!(
            waited < Duration::from_secs(1),
            "park did not wake on signal: waited {waited:?}"
        );
    }

    #[test]
    fn test_parking_wake_before_idle_is_not_lost() {
        let strategy = Parking::new(Duration::from_secs(5));
        strategy.wake();

        let start = Instant::now();
        strategy.idle(0);
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "pre-signaled idle should return immediately"
        );
    }

    #[test]
    fn test_parking_timeout_bounds_the_wait() {
        let strategy = Parking::new(Duration::from_millis(10));
        let start = Instant::now();
        strategy.idle(0);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_yielding_escalates() {
        // smoke: neither branch may panic
        let strategy = Yielding::default();
        strategy.idle(0);
        strategy.idle(1_000);
        strategy.wake();
    }
}
