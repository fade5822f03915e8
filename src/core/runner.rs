//! # The consumer loop.
//!
//! Exactly one thread per loop runs [`run`]. Each iteration:
//!
//! 1. snapshot the clock **once** (per-task re-reads would be costly and
//!    would destabilize relative ordering inside the batch);
//! 2. drain due timer entries, up to the timer batch limit, re-queuing
//!    periodic entries after demoting them to the low-priority lane;
//! 3. drain published ring slots, up to the batch limit or the high-water
//!    sequence captured at the start of the drain — slots published *during*
//!    the batch wait for the next iteration, which bounds per-iteration work;
//! 4. call the agent's batch-boundary hook;
//! 5. if the iteration did nothing, idle in the wait strategy.
//!
//! Task failures never abort the loop: every body runs under
//! `catch_unwind`, panics are logged, and result-bearing tasks settle their
//! cell instead. The one fatal hook is `Agent::on_start`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{Agent, NoopAgent};
use crate::error::{panic_message, TaskError};
use crate::ring::{EventPayload, Slot, SlotKind, Work};
use crate::timer::{FireResult, ScheduledEntry, Step, TimerQueue};

use super::handle::{EventLoop, Inner};
use super::state::LoopState;

/// Entry point of the consumer thread.
pub(crate) fn run(lp: EventLoop) {
    let inner = Arc::clone(&lp.inner);
    let _ = inner.consumer_thread.set(std::thread::current().id());

    let agent = inner
        .agent
        .lock()
        .take()
        .unwrap_or_else(|| Box::new(NoopAgent));

    let mut runner = Runner {
        lp: lp.clone(),
        inner: Arc::clone(&inner),
        agent,
        queue: TimerQueue::new(),
        next_read: 0,
        idle_rounds: 0,
    };

    info!(name = %inner.name, "event loop started");

    let started = match catch_unwind(AssertUnwindSafe(|| runner.agent.on_start(&lp))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(name = %inner.name, error = %e, "agent on_start failed; aborting loop");
            false
        }
        Err(p) => {
            warn!(
                name = %inner.name,
                panic = %panic_message(p.as_ref()),
                "agent on_start panicked; aborting loop"
            );
            false
        }
    };

    if started {
        runner.main_loop();
    } else {
        // fatal startup failure: skip steady state, go straight to the drain
        inner
            .state
            .advance(LoopState::Started, LoopState::ShuttingDown);
    }

    runner.drain();
}

/// What one consumed slot carried, extracted so the slot can be cleared
/// before any of it runs.
pub(crate) enum Consumed {
    Nothing,
    Run(Box<dyn FnOnce() + Send>),
    Timed(Arc<ScheduledEntry>),
    CancelTimed(Arc<ScheduledEntry>),
    Event(EventPayload),
}

pub(crate) fn extract(slot: &mut Slot) -> Consumed {
    match slot.kind {
        SlotKind::Task => match slot.work.take() {
            Some(Work::Run(f)) => Consumed::Run(f),
            Some(Work::Timed(e)) => Consumed::Timed(e),
            Some(Work::CancelTimed(e)) => Consumed::CancelTimed(e),
            None => Consumed::Nothing,
        },
        SlotKind::Event => Consumed::Event(std::mem::take(&mut slot.payload)),
        SlotKind::Empty | SlotKind::Sentinel => Consumed::Nothing,
    }
}

pub(crate) struct Runner {
    pub(crate) lp: EventLoop,
    pub(crate) inner: Arc<Inner>,
    pub(crate) agent: Box<dyn Agent>,
    pub(crate) queue: TimerQueue,
    /// Next ring sequence to consume; mirrors the channel's released cursor.
    pub(crate) next_read: u64,
    idle_rounds: u32,
}

impl Runner {
    fn main_loop(&mut self) {
        loop {
            if self.inner.state.is_shutting_down() {
                break;
            }
            let now = self.inner.clock.now();
            let ran_timers = self.drain_due_timers(now, true);
            let ran_ring = self.drain_ring();

            if let Err(p) = catch_unwind(AssertUnwindSafe(|| self.agent.update())) {
                warn!(panic = %panic_message(p.as_ref()), "agent update hook panicked");
            }

            if ran_timers + ran_ring == 0 {
                self.idle_rounds = self.idle_rounds.saturating_add(1);
                self.inner.strategy.idle(self.idle_rounds);
            } else {
                self.idle_rounds = 0;
            }
        }
    }

    /// Runs due timer entries. `requeue` is false during the final drain,
    /// where a periodic entry runs once more and then its series ends.
    pub(crate) fn drain_due_timers(&mut self, now: u64, requeue: bool) -> usize {
        let mut ran = 0;
        while ran < self.inner.timer_batch_limit {
            let due = matches!(self.queue.peek(), Some(e) if e.next_at() <= now);
            if !due {
                break;
            }
            let entry = self.queue.poll().expect("peeked entry vanished");
            ran += 1;
            if let Some(again) = self.fire_entry(entry, now) {
                if requeue {
                    self.queue.add(again);
                } else {
                    again.fail(TaskError::Canceled);
                }
            }
        }
        ran
    }

    /// Executes one due entry; returns it back when it wants re-queuing.
    fn fire_entry(
        &mut self,
        entry: Arc<ScheduledEntry>,
        now: u64,
    ) -> Option<Arc<ScheduledEntry>> {
        if entry.is_canceled() {
            return None;
        }
        match catch_unwind(AssertUnwindSafe(|| entry.run())) {
            Err(p) => {
                let message = panic_message(p.as_ref());
                warn!(panic = %message, "scheduled task panicked; series canceled");
                entry.fail(TaskError::Panicked { message });
                None
            }
            Ok(Step::Done) => None,
            Ok(Step::Continue) => match entry.reschedule(now) {
                FireResult::Requeue => Some(entry),
                FireResult::Finished => None,
                FireResult::TimedOut => {
                    entry.fail(TaskError::DeadlineExceeded {
                        budget: entry.budget_hint(),
                    });
                    None
                }
            },
        }
    }

    /// Drains published ring slots up to the batch limit / high-water mark.
    fn drain_ring(&mut self) -> usize {
        let channel = &self.inner.channel;
        let cap_end = channel
            .claim_cursor()
            .min(self.next_read + self.inner.batch_limit as u64);
        let high = channel.highest_published(self.next_read, cap_end);

        let mut ran = 0;
        while self.next_read < high {
            let seq = self.next_read;
            self.next_read += 1;
            ran += 1;
            let consumed = self.inner.channel.consume_with(seq, extract);
            self.apply(consumed);
        }
        ran
    }

    /// Runs one consumed item on the consumer thread.
    pub(crate) fn apply(&mut self, consumed: Consumed) {
        match consumed {
            Consumed::Nothing => {}
            Consumed::Run(f) => {
                if let Err(p) = catch_unwind(AssertUnwindSafe(f)) {
                    warn!(panic = %panic_message(p.as_ref()), "task panicked");
                }
            }
            Consumed::Timed(entry) => {
                if !entry.is_canceled() {
                    self.queue.add(entry);
                }
            }
            Consumed::CancelTimed(entry) => {
                let _ = self.queue.remove(&entry);
            }
            Consumed::Event(mut payload) => {
                if let Err(p) =
                    catch_unwind(AssertUnwindSafe(|| self.agent.on_event(&mut payload)))
                {
                    warn!(panic = %panic_message(p.as_ref()), "agent event hook panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::Parking;
    use crate::{EventLoopBuilder, LoopConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAgent {
        starts: Arc<AtomicUsize>,
        events: Arc<AtomicUsize>,
        updates: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
        fail_start: bool,
    }

    impl Agent for CountingAgent {
        fn on_start(&mut self, _lp: &EventLoop) -> Result<(), TaskError> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            if self.fail_start {
                return Err(TaskError::Panicked {
                    message: "refused".into(),
                });
            }
            Ok(())
        }

        fn on_event(&mut self, payload: &mut EventPayload) {
            self.events
                .fetch_add(payload.int_a as usize, Ordering::Relaxed);
        }

        fn update(&mut self) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }

        fn on_shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counters() -> (
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        (
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        )
    }

    #[test]
    fn test_agent_hooks_fire() {
        let (starts, events, updates, shutdowns) = counters();
        let agent = CountingAgent {
            starts: Arc::clone(&starts),
            events: Arc::clone(&events),
            updates: Arc::clone(&updates),
            shutdowns: Arc::clone(&shutdowns),
            fail_start: false,
        };
        let lp = EventLoopBuilder::new(LoopConfig::default())
            .with_agent(agent)
            .with_wait_strategy(Parking::default())
            .build();

        lp.post_event(crate::EventPayload::new(3)).unwrap();
        lp.post_event(crate::EventPayload::new(4)).unwrap();
        let done = lp.submit(|| ()).unwrap();
        assert!(done.wait_for(Duration::from_secs(5)));

        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));

        assert_eq!(starts.load(Ordering::Relaxed), 1);
        assert_eq!(events.load(Ordering::Relaxed), 7);
        assert!(
            updates.load(Ordering::Relaxed) >= 1,
            "no batch boundary hook"
        );
        assert_eq!(shutdowns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failing_on_start_is_fatal() {
        let (starts, events, updates, shutdowns) = counters();
        let agent = CountingAgent {
            starts: Arc::clone(&starts),
            events,
            updates,
            shutdowns: Arc::clone(&shutdowns),
            fail_start: true,
        };
        let lp = EventLoopBuilder::new(LoopConfig::default())
            .with_agent(agent)
            .build();

        // first submission starts the thread; on_start fails; the loop must
        // drain and terminate on its own, without an external shutdown()
        let _ = lp.execute(|| {});
        assert!(
            lp.await_termination(Duration::from_secs(5)),
            "fatal on_start did not terminate the loop"
        );
        assert_eq!(starts.load(Ordering::Relaxed), 1);
        assert_eq!(
            shutdowns.load(Ordering::Relaxed),
            1,
            "on_shutdown must still run after a fatal start"
        );
        assert_eq!(lp.state(), LoopState::Terminated);
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let lp = EventLoop::new(LoopConfig::default());
        lp.execute(|| panic!("task boom")).unwrap();
        let after = lp.submit(|| 99).unwrap();
        assert!(after.wait_for(Duration::from_secs(5)));
        assert_eq!(after.try_get().unwrap().unwrap(), 99);
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_panicking_submit_settles_cell() {
        let lp = EventLoop::new(LoopConfig::default());
        let cell = lp.submit(|| -> u32 { panic!("settle me") }).unwrap();
        assert!(cell.wait_for(Duration::from_secs(5)));
        let err = cell.try_get().unwrap().unwrap_err();
        assert!(matches!(
            &*err,
            TaskError::Panicked { message } if message.contains("settle me")
        ));
        lp.shutdown();
        assert!(lp.await_termination(Duration::from_secs(5)));
    }
}
