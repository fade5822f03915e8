//! # Scheduled task entries.
//!
//! A [`ScheduledEntry`] wraps a unit of work plus everything the timer queue
//! orders on: trigger time, priority lane, insertion sequence, and (for
//! periodic work) the retrigger rule. Ownership moves between the queue
//! (pending) and the consumer's hand (in flight); the entry itself is shared
//! behind an `Arc` so a [`Scheduled`](crate::Scheduled) handle can cancel it
//! from any thread.
//!
//! ## Retrigger math
//! - **Fixed-rate**: `next_at += period` — the series drifts forward from the
//!   logical schedule, never from "now", so one overrunning execution does
//!   not shift every later tick.
//! - **Fixed-delay**: `next_at = now + delay` — anchored to actual
//!   completion.
//!
//! ## Time-sharing budget
//! Entries may carry a remaining budget, charged per firing: the period
//! (logical time) in fixed-rate mode, the real elapsed time since the
//! trigger (floored at the delay) in fixed-delay mode. When the budget hits
//! zero the entry settles with `TaskError::DeadlineExceeded` instead of
//! re-queuing.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TaskError;

/// "Not in the heap" marker for the back-pointer.
pub(crate) const NO_HEAP_INDEX: usize = usize::MAX;

/// Unlimited budget marker.
const NO_BUDGET: u64 = u64::MAX;

/// First-run / high-priority lane.
pub(crate) const LANE_FIRST: u8 = 0;
/// Demoted periodic lane: ordered only relative to itself.
pub(crate) const LANE_PERIODIC: u8 = 1;

/// How an entry retriggers after firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeriodKind {
    /// Fires once.
    OneShot,
    /// Logical-schedule period, nanoseconds.
    FixedRate(u64),
    /// Completion-anchored delay, nanoseconds.
    FixedDelay(u64),
}

/// Public periodic cadence selector for `schedule_fixed_*` / `time_shared`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    /// Fire on the logical schedule `first, first+p, first+2p, …`
    /// regardless of how late individual executions run.
    FixedRate(Duration),
    /// Fire `delay` after each completion.
    FixedDelay(Duration),
}

impl Cadence {
    /// Internal encoding; a zero period is clamped to 1ns so a misconfigured
    /// cadence degrades to "as fast as the loop ticks" instead of a stuck
    /// same-timestamp series.
    pub(crate) fn to_period_kind(self) -> PeriodKind {
        let nanos = |d: Duration| (d.as_nanos().min(u128::from(u64::MAX)) as u64).max(1);
        match self {
            Cadence::FixedRate(p) => PeriodKind::FixedRate(nanos(p)),
            Cadence::FixedDelay(p) => PeriodKind::FixedDelay(nanos(p)),
        }
    }
}

/// What one invocation of the body reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Terminal: a result was produced (or the body is one-shot).
    Done,
    /// Not yet done; eligible for re-queuing.
    Continue,
}

/// What to do with the entry after a firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FireResult {
    /// Drop the entry; it completed (or is one-shot).
    Finished,
    /// Put it back in the queue at its new trigger time.
    Requeue,
    /// Budget exhausted: settle with a timeout failure, do not re-queue.
    TimedOut,
}

struct EntryBody {
    /// The work; `None` once a terminal step consumed it.
    step: Option<Box<dyn FnMut() -> Step + Send>>,
    /// Settles the entry's cell on timeout/panic. Consumed at most once.
    on_fail: Option<Box<dyn FnOnce(TaskError) + Send>>,
}

/// One scheduled unit of work. Fields mutated only by the consumer thread,
/// except `canceled` (any thread) — all are atomics so the `Arc` can be
/// shared with cancellation handles without a lock on the ordering keys.
pub struct ScheduledEntry {
    seq: u64,
    period: PeriodKind,
    next_at: AtomicU64,
    lane: AtomicU8,
    heap_idx: AtomicUsize,
    /// Remaining budget, nanoseconds; `NO_BUDGET` = unlimited.
    budget: AtomicU64,
    /// Configured budget, reported by timeout failures.
    budget_total: Duration,
    canceled: AtomicBool,
    body: Mutex<EntryBody>,
}

impl ScheduledEntry {
    pub(crate) fn new(
        seq: u64,
        first_at: u64,
        period: PeriodKind,
        budget: Option<Duration>,
        step: Box<dyn FnMut() -> Step + Send>,
        on_fail: Box<dyn FnOnce(TaskError) + Send>,
    ) -> Self {
        Self {
            seq,
            period,
            next_at: AtomicU64::new(first_at),
            lane: AtomicU8::new(LANE_FIRST),
            heap_idx: AtomicUsize::new(NO_HEAP_INDEX),
            budget: AtomicU64::new(
                budget.map_or(NO_BUDGET, |d| d.as_nanos().min(u128::from(u64::MAX)) as u64),
            ),
            budget_total: budget.unwrap_or(Duration::ZERO),
            canceled: AtomicBool::new(false),
            body: Mutex::new(EntryBody {
                step: Some(step),
                on_fail: Some(on_fail),
            }),
        }
    }

    // ---- ordering keys ----------------------------------------------

    #[inline]
    pub(crate) fn insertion_seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub(crate) fn next_at(&self) -> u64 {
        self.next_at.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn lane(&self) -> u8 {
        self.lane.load(Ordering::Relaxed)
    }

    /// `(trigger, lane, insertion)` ascending — the queue comparator.
    #[inline]
    pub(crate) fn key(&self) -> (u64, u8, u64) {
        (self.next_at(), self.lane(), self.seq)
    }

    // ---- heap back-pointer ------------------------------------------

    #[inline]
    pub(crate) fn heap_index(&self) -> usize {
        self.heap_idx.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_heap_index(&self, idx: usize) {
        self.heap_idx.store(idx, Ordering::Relaxed);
    }

    // ---- cancellation ------------------------------------------------

    /// Cross-thread cancellation mark; the consumer drops marked entries
    /// when they surface (or earlier via an O(log n) queue removal).
    pub(crate) fn mark_canceled(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    // ---- execution ---------------------------------------------------

    /// Runs one invocation of the body. Consumer thread only.
    pub(crate) fn run(&self) -> Step {
        let mut body = self.body.lock();
        match body.step.as_mut() {
            Some(step) => {
                let result = step();
                if result == Step::Done {
                    body.step = None;
                }
                result
            }
            // terminal step already consumed
            None => Step::Done,
        }
    }

    /// Settles the entry's cell with `cause` (timeout / panic). Idempotent;
    /// also drops the body so a failed entry cannot fire again.
    pub(crate) fn fail(&self, cause: TaskError) {
        let (step, on_fail) = {
            let mut body = self.body.lock();
            (body.step.take(), body.on_fail.take())
        };
        drop(step);
        if let Some(f) = on_fail {
            f(cause);
        }
    }

    /// The configured budget, as reported by timeout failures.
    pub(crate) fn budget_hint(&self) -> Duration {
        self.budget_total
    }

    /// Decides the entry's fate after a non-terminal firing at `now`:
    /// charges the budget, advances the trigger, and demotes the lane.
    pub(crate) fn reschedule(&self, now: u64) -> FireResult {
        let trigger = self.next_at.load(Ordering::Relaxed);
        let (charge, next) = match self.period {
            PeriodKind::OneShot => return FireResult::Finished,
            PeriodKind::FixedRate(period) => (period, trigger.saturating_add(period)),
            PeriodKind::FixedDelay(delay) => {
                let elapsed = now.saturating_sub(trigger).max(delay);
                (elapsed, now.saturating_add(delay))
            }
        };

        let remaining = self.budget.load(Ordering::Relaxed);
        if remaining != NO_BUDGET {
            if remaining <= charge {
                self.budget.store(0, Ordering::Relaxed);
                return FireResult::TimedOut;
            }
            self.budget.store(remaining - charge, Ordering::Relaxed);
        }

        self.next_at.store(next, Ordering::Relaxed);
        self.lane.store(LANE_PERIODIC, Ordering::Relaxed);
        FireResult::Requeue
    }
}

impl std::fmt::Debug for ScheduledEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledEntry")
            .field("seq", &self.seq)
            .field("period", &self.period)
            .field("next_at", &self.next_at())
            .field("lane", &self.lane())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(first_at: u64, period: PeriodKind, budget: Option<Duration>) -> ScheduledEntry {
        ScheduledEntry::new(
            1,
            first_at,
            period,
            budget,
            Box::new(|| Step::Continue),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_fixed_rate_advances_from_logical_schedule() {
        // period 10, first trigger 0; even though each firing happens 5
        // units late, the series stays 0, 10, 20, 30...
        let e = entry(0, PeriodKind::FixedRate(10), None);
        for expected_next in [10_u64, 20, 30] {
            let overrun_now = e.next_at() + 5;
            assert_eq!(e.reschedule(overrun_now), FireResult::Requeue);
            assert_eq!(e.next_at(), expected_next, "drifted off logical series");
        }
    }

    #[test]
    fn test_fixed_delay_anchors_to_completion() {
        let e = entry(100, PeriodKind::FixedDelay(10), None);
        // fired late, at 130: next trigger is 130 + 10
        assert_eq!(e.reschedule(130), FireResult::Requeue);
        assert_eq!(e.next_at(), 140);
    }

    #[test]
    fn test_one_shot_never_requeues() {
        let e = entry(0, PeriodKind::OneShot, None);
        assert_eq!(e.reschedule(0), FireResult::Finished);
    }

    #[test]
    fn test_demoted_to_periodic_lane_after_first_firing() {
        let e = entry(0, PeriodKind::FixedRate(10), None);
        assert_eq!(e.lane(), LANE_FIRST);
        e.reschedule(0);
        assert_eq!(e.lane(), LANE_PERIODIC);
    }

    #[test]
    fn test_budget_exhaustion_forces_timeout() {
        // budget 25, period 10 (rate): fires at 0, 10, 20 then times out
        let e = entry(0, PeriodKind::FixedRate(10), Some(Duration::from_nanos(25)));
        assert_eq!(e.reschedule(0), FireResult::Requeue); // budget 15
        assert_eq!(e.reschedule(10), FireResult::Requeue); // budget 5
        assert_eq!(e.reschedule(20), FireResult::TimedOut);
        assert_eq!(e.budget_hint(), Duration::from_nanos(25));
    }

    #[test]
    fn test_fixed_delay_budget_charges_real_elapsed() {
        // delay 10, budget 25; consumer stalls 20 real units on the second
        // firing, so the budget drains faster than the logical series
        let e = entry(
            0,
            PeriodKind::FixedDelay(10),
            Some(Duration::from_nanos(25)),
        );
        assert_eq!(e.reschedule(0), FireResult::Requeue); // charge 10 -> 15
        let trigger = e.next_at();
        assert_eq!(e.reschedule(trigger + 20), FireResult::TimedOut); // charge 30
    }

    #[test]
    fn test_run_consumes_terminal_step() {
        let mut remaining = 2;
        let e = ScheduledEntry::new(
            1,
            0,
            PeriodKind::FixedRate(1),
            None,
            Box::new(move || {
                remaining -= 1;
                if remaining == 0 {
                    Step::Done
                } else {
                    Step::Continue
                }
            }),
            Box::new(|_| {}),
        );
        assert_eq!(e.run(), Step::Continue);
        assert_eq!(e.run(), Step::Done);
        // body consumed: further runs are inert
        assert_eq!(e.run(), Step::Done);
    }

    #[test]
    fn test_fail_settles_once() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f2 = std::sync::Arc::clone(&fired);
        let e = ScheduledEntry::new(
            1,
            0,
            PeriodKind::OneShot,
            None,
            Box::new(|| Step::Done),
            Box::new(move |_| {
                f2.fetch_add(1, Ordering::Relaxed);
            }),
        );
        e.fail(TaskError::Canceled);
        e.fail(TaskError::Canceled);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
