//! # Shutdown drain.
//!
//! The critical invariant: **any sequence claimed before the loop observed
//! `ShuttingDown` remains safely consumable.** The drain never races
//! producers on slot memory because producers stay capacity-gated; closing
//! the channel is what unblocks producers stuck on a full ring (their claims
//! abort into the rejection path instead).
//!
//! Order of operations, all on the consumer thread:
//!
//! 1. run due timer entries once (periodic series end here, no re-queue);
//! 2. close the channel, then wait until every sequence claimed before the
//!    close snapshot is published — producers always publish what they
//!    claim (as a sentinel on the failure path), so this wait terminates —
//!    and **execute** that backlog;
//! 3. run timer entries the backlog just transferred, once, and cancel
//!    everything still queued;
//! 4. advance to `Shutdown`; sweep once more for racers that claimed before
//!    the close landed, **discarding** their work (slots still cleared — a
//!    missed clear is a leak);
//! 5. advance to `Terminated`, run the agent's shutdown hook, wake
//!    `await_termination` waiters.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam_utils::Backoff;
use tracing::{debug, info, warn};

use crate::error::{panic_message, TaskError};

use super::runner::{extract, Consumed, Runner};
use super::state::LoopState;

impl Runner {
    /// Final drain; runs exactly once, after the main loop exits.
    pub(crate) fn drain(&mut self) {
        let inner = std::sync::Arc::clone(&self.inner);
        // normal path already CASed this; keep the drain self-contained
        inner
            .state
            .advance(LoopState::Started, LoopState::ShuttingDown);

        // 1. due scheduled tasks run once
        let now = inner.clock.now();
        self.drain_due_timers(now, false);

        // 2. execute the claimed-before-shutdown backlog
        inner.channel.close();
        let claimed = inner.channel.claim_cursor();
        self.await_published(claimed);
        self.consume_range(claimed, true);

        // 3. scheduled entries the backlog transferred: due ones run once,
        // the rest are canceled
        let now = inner.clock.now();
        self.drain_due_timers(now, false);
        for entry in self.queue.drain() {
            entry.fail(TaskError::Canceled);
        }

        // 4. discard sweep for straggler claims
        inner
            .state
            .advance(LoopState::ShuttingDown, LoopState::Shutdown);
        let stragglers = inner.channel.claim_cursor();
        self.await_published(stragglers);
        self.consume_range(stragglers, false);

        // 5. done
        inner
            .state
            .advance(LoopState::Shutdown, LoopState::Terminated);
        if let Err(p) = catch_unwind(AssertUnwindSafe(|| self.agent.on_shutdown())) {
            warn!(panic = %panic_message(p.as_ref()), "agent shutdown hook panicked");
        }
        info!(name = %inner.name, "event loop terminated");
        self.lp.notify_terminated();
    }

    /// Spins until every sequence below `limit` is published. Terminates
    /// because a claim is followed by a publish with nothing blocking in
    /// between (the failure path publishes a sentinel).
    fn await_published(&self, limit: u64) {
        let backoff = Backoff::new();
        while !self.inner.channel.all_published_below(limit) {
            backoff.snooze();
        }
    }

    /// Consumes `[next_read, limit)`, executing or discarding.
    fn consume_range(&mut self, limit: u64, execute: bool) {
        while self.next_read < limit {
            let seq = self.next_read;
            self.next_read += 1;
            let consumed = self.inner.channel.consume_with(seq, extract);
            if execute {
                self.apply(consumed);
            } else {
                self.discard(consumed);
            }
        }
    }

    /// Post-`Shutdown` disposal. Slot fields were already cleared by the
    /// channel; cells of discarded scheduled work still settle so nobody
    /// waits on them forever.
    fn discard(&mut self, consumed: Consumed) {
        match consumed {
            Consumed::Nothing => {}
            Consumed::Run(f) => {
                debug!("discarding task published during shutdown");
                drop(f);
            }
            Consumed::Timed(entry) => entry.fail(TaskError::Canceled),
            Consumed::CancelTimed(entry) => {
                let _ = self.queue.remove(&entry);
            }
            Consumed::Event(payload) => {
                debug!("discarding event published during shutdown");
                drop(payload);
            }
        }
    }
}
