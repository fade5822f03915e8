//! Loop lifecycle state machine.
//!
//! Monotonic: transitions only move forward, through a CAS, so concurrent
//! shutdown requests collapse into a single winner. Other threads may only
//! *request* a transition ([`Started`](LoopState::Started) →
//! [`ShuttingDown`](LoopState::ShuttingDown) or the never-started shortcut);
//! the terminal steps belong to the consumer thread.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LoopState {
    /// Built, no task has ever been published.
    NotStarted = 0,
    /// Consumer thread running.
    Started = 1,
    /// Shutdown requested; consumer still executing the backlog.
    ShuttingDown = 2,
    /// Final drain reached its discard phase.
    Shutdown = 3,
    /// Drain complete; resources released.
    Terminated = 4,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::NotStarted,
            1 => LoopState::Started,
            2 => LoopState::ShuttingDown,
            3 => LoopState::Shutdown,
            _ => LoopState::Terminated,
        }
    }
}

/// Atomic holder for [`LoopState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LoopState::NotStarted as u8))
    }

    pub(crate) fn current(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Forward CAS; `true` when this call performed the transition.
    pub(crate) fn advance(&self, from: LoopState, to: LoopState) -> bool {
        debug_assert!(from < to, "lifecycle transitions only move forward");
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.current() >= LoopState::ShuttingDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(LoopState::NotStarted < LoopState::Started);
        assert!(LoopState::ShuttingDown < LoopState::Shutdown);
        assert!(LoopState::Shutdown < LoopState::Terminated);
    }

    #[test]
    fn test_concurrent_shutdown_requests_single_winner() {
        let cell = std::sync::Arc::new(StateCell::new());
        assert!(cell.advance(LoopState::NotStarted, LoopState::Started));

        let winners: usize = (0..8)
            .map(|_| {
                let cell = std::sync::Arc::clone(&cell);
                std::thread::spawn(move || {
                    cell.advance(LoopState::Started, LoopState::ShuttingDown) as usize
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(cell.current(), LoopState::ShuttingDown);
    }

    #[test]
    fn test_stale_transition_fails() {
        let cell = StateCell::new();
        assert!(cell.advance(LoopState::NotStarted, LoopState::Terminated));
        assert!(!cell.advance(LoopState::NotStarted, LoopState::Started));
        assert_eq!(cell.current(), LoopState::Terminated);
    }
}
