//! # Continuation firing: ordering mode and the iterative drive loop.
//!
//! Settling a cell never recurses into dependent cells. Every continuation is
//! converted into a [`Job`] thunk; a job that settles another cell returns
//! that cell's (already ordered) continuations as a [`JobBatch`], which the
//! drive loop splices onto the **front** of its work list and keeps going.
//! Stack depth stays O(1) no matter how long the dependency chain is; the
//! price is that sibling branches of a fan-out graph may interleave — only
//! per-cell ordering is promised.

use std::collections::VecDeque;
use std::sync::OnceLock;

/// A continuation ready to fire. Returns the follow-on jobs produced by any
/// cell it settled.
pub(crate) type Job = Box<dyn FnOnce() -> JobBatch + Send>;

/// Ordered jobs detached from one cell at settlement.
#[derive(Default)]
pub(crate) struct JobBatch(pub(crate) Vec<Job>);

impl JobBatch {
    pub(crate) fn one(job: Job) -> Self {
        Self(vec![job])
    }
}

/// Fires `first` and everything it transitively spawns, iteratively.
pub(crate) fn drive(first: JobBatch) {
    let mut work: VecDeque<Job> = first.0.into();
    while let Some(job) = work.pop_front() {
        let JobBatch(spawned) = job();
        // splice onto the front, preserving the spawned batch's order
        for j in spawned.into_iter().rev() {
            work.push_front(j);
        }
    }
}

/// Order in which one cell's continuations fire at settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiringOrder {
    /// Registration order: earlier-registered continuations fire first
    /// (default).
    Registration,
    /// Raw pop order of the internal stack (newest first). Compatibility
    /// mode for code written against stack-order semantics.
    Stack,
}

static FIRE_ORDER: OnceLock<FiringOrder> = OnceLock::new();

/// The process-wide firing order. Resolved on first use — from
/// [`set_firing_order`] if it ran first, else from the `RINGLOOP_FIRE_ORDER`
/// environment variable (`"stack"` selects [`FiringOrder::Stack`]) — and
/// never re-read.
pub fn firing_order() -> FiringOrder {
    *FIRE_ORDER.get_or_init(|| match std::env::var("RINGLOOP_FIRE_ORDER") {
        Ok(v) if v.eq_ignore_ascii_case("stack") => FiringOrder::Stack,
        _ => FiringOrder::Registration,
    })
}

/// Pins the process-wide firing order before the first settlement resolves
/// it. Returns `false` if the mode was already fixed (set or read).
pub fn set_firing_order(order: FiringOrder) -> bool {
    FIRE_ORDER.set(order).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drive_runs_jobs_in_batch_order() {
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let job = |n: usize, trace: &Arc<parking_lot::Mutex<Vec<usize>>>| -> Job {
            let trace = Arc::clone(trace);
            Box::new(move || {
                trace.lock().push(n);
                JobBatch::default()
            })
        };

        drive(JobBatch(vec![
            job(1, &trace),
            job(2, &trace),
            job(3, &trace),
        ]));
        assert_eq!(*trace.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_spawned_batches_splice_before_pending_work() {
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let trace_leaf = Arc::clone(&trace);
        let leaf = move |n: usize| -> Job {
            let trace = Arc::clone(&trace_leaf);
            Box::new(move || {
                trace.lock().push(n);
                JobBatch::default()
            })
        };

        // job 1 spawns [2, 3]; they must run before the already-queued 4
        let t2 = Arc::clone(&trace);
        let leaf_spawn = leaf.clone();
        let spawner: Job = Box::new(move || {
            t2.lock().push(1);
            JobBatch(vec![leaf_spawn(2), leaf_spawn(3)])
        });

        drive(JobBatch(vec![spawner, leaf(4)]));
        assert_eq!(*trace.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_deep_spawn_chain_is_iterative() {
        // each job spawns the next; depth would overflow the stack if the
        // drive loop recursed
        fn chain(n: usize, hits: Arc<AtomicUsize>) -> Job {
            Box::new(move || {
                hits.fetch_add(1, Ordering::Relaxed);
                if n == 0 {
                    JobBatch::default()
                } else {
                    JobBatch::one(chain(n - 1, hits))
                }
            })
        }
        let hits = Arc::new(AtomicUsize::new(0));
        drive(JobBatch::one(chain(100_000, Arc::clone(&hits))));
        assert_eq!(hits.load(Ordering::Relaxed), 100_001);
    }
}
