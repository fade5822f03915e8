//! # The public event-loop handle.
//!
//! [`EventLoop`] is a cheap clone over the loop's shared core. Any thread may
//! hand work to the single consumer through it:
//!
//! ```text
//! execute(f)                  fire-and-forget closure
//! submit(f) -> cell           result-bearing closure
//! schedule(f, delay)          one-shot delayed task
//! schedule_fixed_rate/delay   periodic task
//! time_shared(f, …, timeout)  incremental task with a time budget
//! post_event(payload)         typed event for the Agent
//! shutdown() / await_termination(timeout)
//! ```
//!
//! ## Submission algorithm
//! 1. Pre-check the lifecycle state — reject if shutting down.
//! 2. Claim a ring sequence: **non-blocking** on the consumer thread (a
//!    blocking claim there would deadlock against its own progress),
//!    blocking on any other thread.
//! 3. Re-check the state. Losing the shutdown race publishes the claimed
//!    sequence as an inert sentinel — producers always publish what they
//!    claim, or the consumer's contiguous scan would stall.
//! 4. Publish the slot and wake the consumer.
//!
//! The first successful publication CAS-starts the consumer thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::agent::Agent;
use crate::clock::Clock;
use crate::error::{panic_message, RejectCause, SubmitError, TaskError};
use crate::policies::{RejectDisposition, RejectPolicy, WaitStrategy, WorkKind};
use crate::promise::CompletionCell;
use crate::ring::{ClaimError, EventPayload, Slot, SlotChannel, Work};
use crate::timer::{Cadence, PeriodKind, ScheduledEntry, Step};

use super::runner;
use super::state::{LoopState, StateCell};

/// Shared core of one event loop.
pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) batch_limit: usize,
    pub(crate) timer_batch_limit: usize,
    pub(crate) state: StateCell,
    pub(crate) channel: SlotChannel,
    pub(crate) strategy: Arc<dyn WaitStrategy>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) reject: Arc<dyn RejectPolicy>,
    /// Insertion sequences for scheduled entries (tie-break key). Loop-local
    /// by construction: owned here, never a process global.
    pub(crate) insertion_seq: AtomicU64,
    /// Taken by the consumer thread when it starts.
    pub(crate) agent: Mutex<Option<Box<dyn Agent>>>,
    pub(crate) consumer_thread: OnceLock<ThreadId>,
    term_done: Mutex<bool>,
    term_cv: Condvar,
}

impl Inner {
    pub(crate) fn new(
        name: String,
        capacity: usize,
        batch_limit: usize,
        timer_batch_limit: usize,
        agent: Box<dyn Agent>,
        strategy: Arc<dyn WaitStrategy>,
        clock: Arc<dyn Clock>,
        reject: Arc<dyn RejectPolicy>,
    ) -> Self {
        Self {
            name,
            batch_limit,
            timer_batch_limit,
            state: StateCell::new(),
            channel: SlotChannel::new(capacity),
            strategy,
            clock,
            reject,
            insertion_seq: AtomicU64::new(0),
            agent: Mutex::new(Some(agent)),
            consumer_thread: OnceLock::new(),
            term_done: Mutex::new(false),
            term_cv: Condvar::new(),
        }
    }
}

/// Handle to a single-consumer event loop. Cloning shares the loop.
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Arc<Inner>,
}

impl EventLoop {
    /// Builds a loop with default collaborators and the given config.
    #[must_use]
    pub fn new(cfg: crate::LoopConfig) -> Self {
        super::builder::EventLoopBuilder::new(cfg).build()
    }

    /// Starts a builder for customizing agent, wait strategy, clock, and
    /// rejection policy.
    #[must_use]
    pub fn builder(cfg: crate::LoopConfig) -> super::builder::EventLoopBuilder {
        super::builder::EventLoopBuilder::new(cfg)
    }

    // ---- introspection ----------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.inner.state.current()
    }

    /// `true` when called on the loop's own consumer thread.
    pub fn is_consumer_thread(&self) -> bool {
        self.inner.consumer_thread.get() == Some(&std::thread::current().id())
    }

    // ---- submission -------------------------------------------------

    /// Fire-and-forget task. Panics inside `f` are caught and logged by the
    /// consumer; the loop keeps running.
    pub fn execute<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let run: Box<dyn FnOnce() + Send> = Box::new(f);
        match self.enqueue(move |slot| slot.set_task(Work::Run(run))) {
            Ok(()) => Ok(()),
            Err(cause) => self.dispose_rejection(WorkKind::Execute, cause),
        }
    }

    /// Result-bearing task. The returned cell settles with `f`'s value, with
    /// [`TaskError::Panicked`] if it panics, or with
    /// [`TaskError::Rejected`] if the submission is refused.
    pub fn submit<T, F>(&self, f: F) -> Result<CompletionCell<T>, SubmitError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = CompletionCell::new();
        let settle = cell.clone();
        let run: Box<dyn FnOnce() + Send> = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(v) => settle.complete(v),
                Err(p) => settle.fail(TaskError::Panicked {
                    message: panic_message(p.as_ref()),
                }),
            };
        });
        match self.enqueue(move |slot| slot.set_task(Work::Run(run))) {
            Ok(()) => Ok(cell),
            Err(cause) => {
                cell.fail(TaskError::Rejected { cause });
                self.dispose_rejection(WorkKind::Submit, cause).map(|_| cell)
            }
        }
    }

    /// One-shot task run after `delay`.
    pub fn schedule<T, F>(&self, f: F, delay: Duration) -> Result<Scheduled<T>, SubmitError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = CompletionCell::new();
        let settle = cell.clone();
        let mut body = Some(f);
        let step = Box::new(move || {
            if let Some(f) = body.take() {
                settle.complete(f());
            }
            Step::Done
        });
        let entry = self.new_entry(delay, PeriodKind::OneShot, None, step, &cell);
        self.send_entry(entry, cell)
    }

    /// Periodic task on a drift-free logical schedule: fires at
    /// `initial_delay, +period, +2×period, …` even when an individual
    /// execution overruns. Runs until canceled (or its body panics).
    pub fn schedule_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Scheduled<()>, SubmitError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_periodic(f, initial_delay, Cadence::FixedRate(period))
    }

    /// Periodic task anchored to completion: each firing happens `delay`
    /// after the previous one finished. Runs until canceled.
    pub fn schedule_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<Scheduled<()>, SubmitError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_periodic(f, initial_delay, Cadence::FixedDelay(delay))
    }

    fn schedule_periodic<F>(
        &self,
        mut f: F,
        initial_delay: Duration,
        cadence: Cadence,
    ) -> Result<Scheduled<()>, SubmitError>
    where
        F: FnMut() + Send + 'static,
    {
        let cell = CompletionCell::new();
        let step = Box::new(move || {
            f();
            Step::Continue
        });
        let entry = self.new_entry(initial_delay, cadence.to_period_kind(), None, step, &cell);
        self.send_entry(entry, cell)
    }

    /// Incremental ("time-sharing") task: runs on `cadence`, reporting "not
    /// yet done" by returning `None`, until it produces `Some(value)` or
    /// exhausts `timeout` — whereupon the cell settles with
    /// [`TaskError::DeadlineExceeded`].
    pub fn time_shared<T, F>(
        &self,
        mut f: F,
        initial_delay: Duration,
        cadence: Cadence,
        timeout: Duration,
    ) -> Result<Scheduled<T>, SubmitError>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Option<T> + Send + 'static,
    {
        let cell = CompletionCell::new();
        let settle = cell.clone();
        let step = Box::new(move || match f() {
            Some(v) => {
                settle.complete(v);
                Step::Done
            }
            None => Step::Continue,
        });
        let entry = self.new_entry(
            initial_delay,
            cadence.to_period_kind(),
            Some(timeout),
            step,
            &cell,
        );
        self.send_entry(entry, cell)
    }

    /// Publishes a typed event delivered to the agent's
    /// [`on_event`](crate::Agent::on_event) hook.
    pub fn post_event(&self, payload: EventPayload) -> Result<(), SubmitError> {
        match self.enqueue(move |slot| slot.set_event(payload)) {
            Ok(()) => Ok(()),
            Err(cause) => self.dispose_rejection(WorkKind::Event, cause),
        }
    }

    // ---- lifecycle --------------------------------------------------

    /// Requests shutdown. Safe from any thread, any number of times; the
    /// first caller wins the CAS and the consumer performs the drain.
    pub fn shutdown(&self) {
        // never ran: no thread to drain, terminate in place
        if self
            .inner
            .state
            .advance(LoopState::NotStarted, LoopState::Terminated)
        {
            self.inner.channel.close();
            self.notify_terminated();
            return;
        }
        if self
            .inner
            .state
            .advance(LoopState::Started, LoopState::ShuttingDown)
        {
            // a parked consumer must observe the transition promptly
            self.inner.strategy.wake();
        }
    }

    /// Blocks until the loop reaches [`LoopState::Terminated`] or `timeout`
    /// elapses; returns whether it terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let mut done = self.inner.term_done.lock();
        if !*done {
            self.inner.term_cv.wait_for(&mut done, timeout);
        }
        *done
    }

    pub(crate) fn notify_terminated(&self) {
        let mut done = self.inner.term_done.lock();
        *done = true;
        self.inner.term_cv.notify_all();
    }

    // ---- internals --------------------------------------------------

    fn new_entry<T: Send + Sync + 'static>(
        &self,
        delay: Duration,
        period: PeriodKind,
        budget: Option<Duration>,
        step: Box<dyn FnMut() -> Step + Send>,
        cell: &CompletionCell<T>,
    ) -> Arc<ScheduledEntry> {
        let seq = self.inner.insertion_seq.fetch_add(1, Ordering::Relaxed);
        let first_at = self
            .inner
            .clock
            .now()
            .saturating_add(delay.as_nanos().min(u128::from(u64::MAX)) as u64);
        let on_fail_cell = cell.clone();
        let on_fail = Box::new(move |err: TaskError| {
            on_fail_cell.fail(err);
        });
        Arc::new(ScheduledEntry::new(
            seq, first_at, period, budget, step, on_fail,
        ))
    }

    fn send_entry<T: Send + Sync + 'static>(
        &self,
        entry: Arc<ScheduledEntry>,
        cell: CompletionCell<T>,
    ) -> Result<Scheduled<T>, SubmitError> {
        let transfer = Arc::clone(&entry);
        let scheduled = Scheduled {
            cell,
            entry,
            lp: self.clone(),
        };
        match self.enqueue(move |slot| slot.set_task(Work::Timed(transfer))) {
            Ok(()) => Ok(scheduled),
            Err(cause) => {
                scheduled.entry.mark_canceled();
                scheduled.cell.fail(TaskError::Rejected { cause });
                self.dispose_rejection(WorkKind::Schedule, cause)
                    .map(|_| scheduled)
            }
        }
    }

    /// Claims, re-checks, publishes. See the module docs for the algorithm.
    pub(crate) fn enqueue(&self, fill: impl FnOnce(&mut Slot)) -> Result<(), RejectCause> {
        if self.inner.state.is_shutting_down() {
            return Err(RejectCause::ShuttingDown);
        }
        self.start_if_needed();

        let seq = if self.is_consumer_thread() {
            match self.inner.channel.try_claim() {
                Ok(seq) => seq,
                Err(ClaimError::Full) => return Err(RejectCause::RingFull),
                Err(ClaimError::Closed) => return Err(RejectCause::ShuttingDown),
            }
        } else {
            match self.inner.channel.claim() {
                Ok(seq) => seq,
                Err(_) => return Err(RejectCause::ShuttingDown),
            }
        };

        if self.inner.state.is_shutting_down() {
            // lost the race: publish the claimed slot as an inert marker so
            // the drain's contiguous scan can pass it, then reject
            self.inner.channel.publish_sentinel(seq);
            self.inner.strategy.wake();
            return Err(RejectCause::ShuttingDown);
        }

        self.inner.channel.publish_with(seq, fill);
        self.inner.strategy.wake();
        Ok(())
    }

    fn dispose_rejection(&self, kind: WorkKind, cause: RejectCause) -> Result<(), SubmitError> {
        match self.inner.reject.rejected(kind, cause) {
            RejectDisposition::Raise => Err(SubmitError::from_cause(cause)),
            RejectDisposition::Swallow => Ok(()),
        }
    }

    fn start_if_needed(&self) {
        if !self
            .inner
            .state
            .advance(LoopState::NotStarted, LoopState::Started)
        {
            return;
        }
        let lp = self.clone();
        std::thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || runner::run(lp))
            .expect("failed to spawn event loop consumer thread");
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to one scheduled task: its completion cell plus cancellation.
pub struct Scheduled<T> {
    cell: CompletionCell<T>,
    entry: Arc<ScheduledEntry>,
    lp: EventLoop,
}

impl<T: Send + Sync + 'static> Scheduled<T> {
    /// The cell that settles with the task's result, failure, timeout, or
    /// cancellation.
    pub fn cell(&self) -> &CompletionCell<T> {
        &self.cell
    }

    /// Consumes the handle, keeping only the cell.
    pub fn into_cell(self) -> CompletionCell<T> {
        self.cell
    }

    /// Cancels the task: settles the cell with the stackless marker and
    /// removes the entry from the timer queue (O(log n) via its stored heap
    /// index, performed on the consumer thread; a not-yet-transferred or
    /// already-fired entry is dropped lazily instead). Returns whether this
    /// call performed the cancellation; canceling a settled task is a no-op
    /// reporting "already done".
    pub fn cancel(&self) -> bool {
        if !self.cell.cancel() {
            return false;
        }
        self.entry.mark_canceled();
        let entry = Arc::clone(&self.entry);
        // best effort: during shutdown the drain cancels queue entries anyway
        let _ = self
            .lp
            .enqueue(move |slot| slot.set_task(Work::CancelTimed(entry)));
        true
    }

    /// `true` once the cell failed with the cancellation marker.
    pub fn is_canceled(&self) -> bool {
        self.cell.is_canceled()
    }
}

impl<T> std::fmt::Debug for Scheduled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduled")
            .field("entry", &self.entry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoopConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Instant;

    fn trace() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_same_thread_immediate_tasks_run_fifo() {
        let lp = EventLoop::new(LoopConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..200 {
            let order = Arc::clone(&order);
            lp.execute(move || order.lock().push(n)).unwrap();
        }
        let fence = lp.submit(|| ()).unwrap();
        assert!(fence.wait_for(Duration::from_secs(5)));

        assert_eq!(*order.lock(), (0..200).collect::<Vec<_>>());
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_earlier_deadline_runs_first() {
        let lp = EventLoop::new(LoopConfig::default());
        let tr = trace();

        let t1 = Arc::clone(&tr);
        let a = lp.schedule(move || t1.lock().push("A"), Duration::from_millis(120));
        let t2 = Arc::clone(&tr);
        let b = lp.schedule(move || t2.lock().push("B"), Duration::from_millis(40));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.cell().wait_for(Duration::from_secs(5)));
        assert!(b.cell().wait_for(Duration::from_secs(5)));
        assert_eq!(*tr.lock(), vec!["B", "A"], "delay order violated");
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_fixed_rate_fires_until_canceled() {
        let lp = EventLoop::new(LoopConfig::default());
        let ticks = Arc::new(AtomicUsize::new(0));
        let t2 = Arc::clone(&ticks);
        let ticker = lp
            .schedule_fixed_rate(
                move || {
                    t2.fetch_add(1, Ordering::Relaxed);
                },
                Duration::ZERO,
                Duration::from_millis(5),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::Relaxed) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::Relaxed) >= 3, "ticker never got going");

        assert!(ticker.cancel());
        assert!(!ticker.cancel(), "second cancel reports already-done");
        assert!(ticker.is_canceled());

        let after_cancel = ticks.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(50));
        assert!(
            ticks.load(Ordering::Relaxed) <= after_cancel + 1,
            "ticker kept firing after cancel"
        );
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancel_before_fire_prevents_execution() {
        let lp = EventLoop::new(LoopConfig::default());
        let ran = Arc::new(AtomicBool::new(false));
        let r2 = Arc::clone(&ran);
        let task = lp
            .schedule(
                move || {
                    r2.store(true, Ordering::Relaxed);
                },
                Duration::from_millis(80),
            )
            .unwrap();

        assert!(task.cancel());
        std::thread::sleep(Duration::from_millis(150));
        assert!(!ran.load(Ordering::Relaxed), "canceled task still ran");
        assert!(task.cell().is_canceled());
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_consumer_thread_uses_non_blocking_claims() {
        // a consumer-thread submitter must get RingFull (not a deadlock)
        // once it has claimed every free slot in its own ring
        let mut cfg = LoopConfig::default();
        cfg.ring_capacity = 8;
        let lp = EventLoop::new(cfg);

        let lp2 = lp.clone();
        let probe = lp
            .submit(move || {
                assert!(lp2.is_consumer_thread());
                let mut accepted = 0;
                loop {
                    match lp2.execute(|| {}) {
                        Ok(()) => accepted += 1,
                        Err(e) => return (accepted, e),
                    }
                }
            })
            .unwrap();

        assert!(probe.wait_for(Duration::from_secs(5)));
        let (accepted, err) = probe.try_get().unwrap().unwrap();
        assert_eq!(err, SubmitError::RingFull);
        assert_eq!(accepted, 8, "free capacity at claim time was the ring");
        assert!(!lp.is_consumer_thread());
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_end_to_end_scenario_trace() {
        // immediate A; one-shot B at 300ms; time-sharing C every 60ms from
        // 30ms with a 150ms budget and no result: expected trace
        // A, C, C, C (budget dies), B — and C's cell fails with the timeout.
        let lp = EventLoop::new(LoopConfig::default());
        let tr = trace();

        let ta = Arc::clone(&tr);
        lp.execute(move || ta.lock().push("A")).unwrap();

        let tb = Arc::clone(&tr);
        let b = lp
            .schedule(move || tb.lock().push("B"), Duration::from_millis(300))
            .unwrap();

        let tc = Arc::clone(&tr);
        let c = lp
            .time_shared(
                move || -> Option<()> {
                    tc.lock().push("C");
                    None // never done
                },
                Duration::from_millis(30),
                Cadence::FixedRate(Duration::from_millis(60)),
                Duration::from_millis(150),
            )
            .unwrap();

        assert!(c.cell().wait_for(Duration::from_secs(5)));
        let err = c.cell().peek(|o| o.as_ref().err().cloned()).unwrap();
        let err = err.expect("time-shared task must time out");
        assert!(matches!(
            &*err,
            TaskError::DeadlineExceeded { budget } if *budget == Duration::from_millis(150)
        ));

        assert!(b.cell().wait_for(Duration::from_secs(5)));
        assert_eq!(*tr.lock(), vec!["A", "C", "C", "C", "B"]);
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_time_shared_completes_when_result_appears() {
        let lp = EventLoop::new(LoopConfig::default());
        let mut countdown = 3;
        let task = lp
            .time_shared(
                move || {
                    countdown -= 1;
                    (countdown == 0).then_some("finished")
                },
                Duration::ZERO,
                Cadence::FixedDelay(Duration::from_millis(5)),
                Duration::from_secs(30),
            )
            .unwrap();

        assert!(task.cell().wait_for(Duration::from_secs(5)));
        assert_eq!(task.cell().try_get().unwrap().unwrap(), "finished");
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }
}
