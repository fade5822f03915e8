//! # Single-assignment completion cell (this crate's future/promise).
//!
//! A [`CompletionCell`] holds exactly one of: *pending*, *succeeded(value)*,
//! or *failed(cause)*. The transition happens at most once; `complete`,
//! `fail` and `cancel` report whether **this** call performed it.
//!
//! ## Settlement
//! ```text
//! complete(v) ──► detach listener list (state flips under the lock)
//!             ──► order it (registration order by default, see FiringOrder)
//!             ──► fire in a while-loop; a continuation that settles a
//!                 dependent cell splices that cell's listeners onto the
//!                 FRONT of the work list instead of recursing
//! ```
//! Chains of 100k+ dependent cells settle with O(1) stack depth.
//!
//! ## Rules
//! - A listener registered **after** settlement runs inline on the
//!   registering thread (settled cells stay immediately collectable; there
//!   is no queue left to traverse).
//! - Cancellation is `fail(TaskError::Canceled)` — a stackless marker, and
//!   [`is_canceled`](CompletionCell::is_canceled) tests for that marker
//!   specifically, distinct from ordinary failure.
//! - Combinator callbacks that panic settle the dependent cell with
//!   [`TaskError::Panicked`] instead of unwinding through the completer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::completion::{drive, firing_order, FiringOrder, Job, JobBatch};
use crate::error::{panic_message, TaskError};

/// A settled result: the value, or a shared failure cause.
pub type Outcome<T> = Result<T, Arc<TaskError>>;

type Listener<T> = Box<dyn FnOnce(&Arc<Outcome<T>>) -> JobBatch + Send>;

enum CellState<T> {
    Pending(Vec<Listener<T>>),
    Settled(Arc<Outcome<T>>),
}

struct Shared<T> {
    state: Mutex<CellState<T>>,
}

/// Single-assignment result holder with chained continuations.
///
/// Cloning is cheap and shares the underlying cell; any clone may complete
/// it, and all clones observe the same settlement forever.
///
/// # Example
/// ```
/// use ringloop::CompletionCell;
///
/// let cell: CompletionCell<i32> = CompletionCell::new();
/// let doubled = cell.map(|v| v * 2);
///
/// assert!(cell.complete(21));
/// assert!(!cell.complete(99), "second completion is a no-op");
/// assert_eq!(doubled.try_get().unwrap().unwrap(), 42);
/// ```
pub struct CompletionCell<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CompletionCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Default for CompletionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> CompletionCell<T> {
    /// Creates a pending cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CellState::Pending(Vec::new())),
            }),
        }
    }

    // ---- transitions -------------------------------------------------

    /// Settles the cell with a value. Returns whether this call performed
    /// the transition.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Arc::new(Ok(value)))
    }

    /// Settles the cell with a failure cause.
    pub fn fail(&self, cause: TaskError) -> bool {
        self.settle(Arc::new(Err(Arc::new(cause))))
    }

    /// Cancels the cell: terminal, idempotent, stackless.
    pub fn cancel(&self) -> bool {
        self.fail(TaskError::Canceled)
    }

    fn settle(&self, outcome: Arc<Outcome<T>>) -> bool {
        match self.settle_detached(outcome) {
            Some(batch) => {
                drive(batch);
                true
            }
            None => false,
        }
    }

    /// Performs the transition and returns the ordered, unfired listener
    /// batch — or `None` if the cell was already settled. Relay
    /// continuations call this instead of [`settle`](Self::settle) so the
    /// caller's drive loop can splice the batch rather than recurse.
    pub(crate) fn settle_detached(&self, outcome: Arc<Outcome<T>>) -> Option<JobBatch> {
        let listeners = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                CellState::Settled(_) => return None,
                CellState::Pending(listeners) => {
                    let detached = std::mem::take(listeners);
                    *state = CellState::Settled(Arc::clone(&outcome));
                    detached
                }
            }
        };
        Some(to_jobs(listeners, outcome, firing_order()))
    }

    // ---- observation -------------------------------------------------

    /// `true` once the cell holds a value or failure.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.shared.state.lock(), CellState::Settled(_))
    }

    /// `true` only if the cell failed with the cancellation marker.
    pub fn is_canceled(&self) -> bool {
        match &*self.shared.state.lock() {
            CellState::Settled(outcome) => {
                matches!(&**outcome, Err(e) if e.is_cancellation())
            }
            CellState::Pending(_) => false,
        }
    }

    /// Applies `f` to the settled outcome, if any. Non-blocking.
    pub fn peek<R>(&self, f: impl FnOnce(&Outcome<T>) -> R) -> Option<R> {
        let outcome = match &*self.shared.state.lock() {
            CellState::Settled(outcome) => Arc::clone(outcome),
            CellState::Pending(_) => return None,
        };
        Some(f(&outcome))
    }

    /// Clones the settled outcome out, if any. Stable forever once settled.
    pub fn try_get(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.peek(|outcome| match outcome {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(Arc::clone(e)),
        })
    }

    /// Blocks the calling thread until the cell settles or `timeout`
    /// elapses; returns whether it settled. Never call from the consumer
    /// thread of the loop that must produce the value.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_settled() {
            return true;
        }
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate2 = Arc::clone(&gate);
        self.on_settled(move |_| {
            let (m, cv) = &*gate2;
            *m.lock() = true;
            cv.notify_all();
        });

        let (m, cv) = &*gate;
        let mut done = m.lock();
        if !*done {
            cv.wait_for(&mut done, timeout);
        }
        *done
    }

    // ---- continuations -----------------------------------------------

    /// Registers a continuation, fired exactly once with the settled
    /// outcome. If the cell is already settled it runs inline, now.
    pub fn on_settled(&self, f: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let listener: Listener<T> = Box::new(move |outcome| {
            f(outcome);
            JobBatch::default()
        });
        drive(self.add_listener(listener));
    }

    /// Registers a raw listener; returns the jobs to run when the cell was
    /// already settled (inline firing), else an empty batch.
    fn add_listener(&self, listener: Listener<T>) -> JobBatch {
        let mut state = self.shared.state.lock();
        match &mut *state {
            CellState::Pending(listeners) => {
                listeners.push(listener);
                JobBatch::default()
            }
            CellState::Settled(outcome) => {
                let outcome = Arc::clone(outcome);
                drop(state);
                JobBatch::one(Box::new(move || listener(&outcome)))
            }
        }
    }

    /// Dependent cell holding `f(value)`; failures pass through untouched.
    pub fn map<U, F>(&self, f: F) -> CompletionCell<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let target = CompletionCell::<U>::new();
        let relay = target.clone();
        let listener: Listener<T> = Box::new(move |outcome| {
            let mapped: Arc<Outcome<U>> = match &**outcome {
                Ok(v) => match catch_unwind(AssertUnwindSafe(|| f(v))) {
                    Ok(u) => Arc::new(Ok(u)),
                    Err(p) => Arc::new(Err(Arc::new(TaskError::Panicked {
                        message: panic_message(p.as_ref()),
                    }))),
                },
                Err(e) => Arc::new(Err(Arc::clone(e))),
            };
            relay.settle_detached(mapped).unwrap_or_default()
        });
        drive(self.add_listener(listener));
        target
    }

    /// Dependent cell settled by the cell `f(value)` returns (compose /
    /// flat-map); failures pass through untouched.
    pub fn and_then<U, F>(&self, f: F) -> CompletionCell<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> CompletionCell<U> + Send + 'static,
    {
        let target = CompletionCell::<U>::new();
        let relay = target.clone();
        let listener: Listener<T> = Box::new(move |outcome| match &**outcome {
            Err(e) => relay
                .settle_detached(Arc::new(Err(Arc::clone(e))))
                .unwrap_or_default(),
            Ok(v) => match catch_unwind(AssertUnwindSafe(|| f(v))) {
                Err(p) => relay
                    .settle_detached(Arc::new(Err(Arc::new(TaskError::Panicked {
                        message: panic_message(p.as_ref()),
                    }))))
                    .unwrap_or_default(),
                Ok(inner) => {
                    let relay2 = relay.clone();
                    inner.add_listener(Box::new(move |o| {
                        relay2.settle_detached(Arc::clone(o)).unwrap_or_default()
                    }))
                }
            },
        });
        drive(self.add_listener(listener));
        target
    }

    /// Dependent cell that converts a failure into `f(cause)`; success and
    /// its value pass through by reference count, not by clone.
    pub fn recover<F>(&self, f: F) -> CompletionCell<T>
    where
        F: FnOnce(&TaskError) -> T + Send + 'static,
    {
        let target = CompletionCell::<T>::new();
        let relay = target.clone();
        let listener: Listener<T> = Box::new(move |outcome| {
            let next: Arc<Outcome<T>> = match &**outcome {
                Ok(_) => Arc::clone(outcome),
                Err(e) => match catch_unwind(AssertUnwindSafe(|| f(e))) {
                    Ok(v) => Arc::new(Ok(v)),
                    Err(p) => Arc::new(Err(Arc::new(TaskError::Panicked {
                        message: panic_message(p.as_ref()),
                    }))),
                },
            };
            relay.settle_detached(next).unwrap_or_default()
        });
        drive(self.add_listener(listener));
        target
    }

    /// Dependent cell holding `f(outcome)` — sees success and failure alike.
    pub fn handle<U, F>(&self, f: F) -> CompletionCell<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Outcome<T>) -> U + Send + 'static,
    {
        let target = CompletionCell::<U>::new();
        let relay = target.clone();
        let listener: Listener<T> = Box::new(move |outcome| {
            let next: Arc<Outcome<U>> = match catch_unwind(AssertUnwindSafe(|| f(outcome))) {
                Ok(u) => Arc::new(Ok(u)),
                Err(p) => Arc::new(Err(Arc::new(TaskError::Panicked {
                    message: panic_message(p.as_ref()),
                }))),
            };
            relay.settle_detached(next).unwrap_or_default()
        });
        drive(self.add_listener(listener));
        target
    }
}

impl<T> std::fmt::Debug for CompletionCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.shared.state.lock() {
            CellState::Pending(listeners) => format!("pending({} listeners)", listeners.len()),
            CellState::Settled(outcome) => match &**outcome {
                Ok(_) => "succeeded".to_string(),
                Err(e) => format!("failed({})", e.as_label()),
            },
        };
        write!(f, "CompletionCell({state})")
    }
}

/// Orders detached listeners per the process mode and wraps them as jobs.
fn to_jobs<T: Send + Sync + 'static>(
    listeners: Vec<Listener<T>>,
    outcome: Arc<Outcome<T>>,
    order: FiringOrder,
) -> JobBatch {
    let ordered: Vec<Listener<T>> = match order {
        // the vec is in registration (push) order already
        FiringOrder::Registration => listeners,
        FiringOrder::Stack => listeners.into_iter().rev().collect(),
    };
    JobBatch(
        ordered
            .into_iter()
            .map(|l| {
                let outcome = Arc::clone(&outcome);
                Box::new(move || l(&outcome)) as Job
            })
            .collect(),
    )
}
