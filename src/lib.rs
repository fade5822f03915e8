//! # ringloop
//!
//! **ringloop** is a single-consumer event-loop executor: many producer
//! threads hand work to exactly one consumer thread, which executes it with
//! strict ordering guarantees, bounded batching, and a deadlock-free
//! shutdown drain.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  producer threads                        consumer thread (1)
//!  ───────────────                         ──────────────────
//!  execute/submit ──► ┌─────────────────┐      ┌──────────────────────┐
//!  schedule_*     ──► │   SlotChannel   │ ───► │ iteration:           │
//!  post_event     ──► │ (lock-free ring,│      │  1 snapshot clock    │
//!                     │  seq-addressed) │      │  2 due timer batch ──┼─► TimerQueue
//!                     └─────────────────┘      │  3 ring batch        │   (indexable
//!                            ▲                 │  4 agent.update()    │    binary heap)
//!            claim/publish   │                 │  5 idle in strategy  │
//!            (CAS + marker)  │                 └──────────────────────┘
//!                            │                        │
//!                     blocking claim off-thread,      ▼
//!                     non-blocking on consumer   CompletionCell settle
//!                     (self-deadlock avoidance)  (iterative, O(1) stack)
//! ```
//!
//! ### Lifecycle
//! ```text
//! NotStarted ──► Started ──► ShuttingDown ──► Shutdown ──► Terminated
//!     │          (first       (CAS-raced      (discard      (resources
//!     │           publish)     request)        sweep)        released)
//!     └────────────────────────────────────────────────────► Terminated
//!                      (shutdown before any task ever ran)
//! ```
//!
//! ## Guarantees
//! - **FIFO** for immediate tasks submitted from one producer thread.
//! - **Time order** for scheduled tasks; ties break by insertion sequence,
//!   and periodic tasks are demoted to a low-priority lane after their first
//!   firing so one-shot tasks are not starved.
//! - **Fixed-rate is drift-free**: the series advances on the logical
//!   schedule, not on wall-clock "now".
//! - **Settlement is iterative**: chains of 100k+ dependent cells settle
//!   without stack growth.
//! - **Shutdown is deadlock-free**: every sequence claimed before shutdown
//!   was observed is executed or cleared; producers stuck on a full ring
//!   unblock into the rejection path.
//!
//! Liveness and ordering are guaranteed; wall-clock precision is bounded by
//! the wait strategy's granularity, not promised.
//!
//! ## Features
//! | Area           | Description                                        | Key types                                   |
//! |----------------|----------------------------------------------------|---------------------------------------------|
//! | **Submission** | Immediate, delayed, periodic, time-sharing tasks.  | [`EventLoop`], [`Scheduled`], [`Cadence`]   |
//! | **Futures**    | Single-assignment cells with chained continuations.| [`CompletionCell`], [`FiringOrder`]         |
//! | **Agent**      | Lifecycle hooks woven into the consumer thread.    | [`Agent`], [`EventPayload`]                 |
//! | **Policies**   | Idle behavior and rejection disposition.           | [`WaitStrategy`], [`RejectPolicy`]          |
//! | **Errors**     | Typed submission/task failures.                    | [`SubmitError`], [`TaskError`]              |
//! | **Time**       | Injectable monotonic clock.                        | [`Clock`], [`ManualClock`]                  |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use ringloop::{Cadence, EventLoop, LoopConfig};
//!
//! let lp = EventLoop::new(LoopConfig::default());
//!
//! // fire-and-forget
//! lp.execute(|| println!("hello from the loop")).unwrap();
//!
//! // result-bearing, with a chained continuation
//! let doubled = lp.submit(|| 21).unwrap().map(|v| v * 2);
//! assert!(doubled.wait_for(Duration::from_secs(5)));
//! assert_eq!(doubled.try_get().unwrap().unwrap(), 42);
//!
//! // periodic until canceled
//! let ticker = lp
//!     .schedule_fixed_rate(|| {}, Duration::ZERO, Duration::from_millis(10))
//!     .unwrap();
//! ticker.cancel();
//!
//! lp.shutdown();
//! assert!(lp.await_termination(Duration::from_secs(5)));
//! ```

mod agent;
mod clock;
mod config;
mod core;
mod error;
mod policies;
mod promise;
mod ring;
mod timer;

// ---- Public re-exports ----

pub use agent::{Agent, NoopAgent};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::LoopConfig;
pub use core::{EventLoop, EventLoopBuilder, LoopState, Scheduled};
pub use error::{RejectCause, SubmitError, TaskError};
pub use policies::{
    AbortOnReject, BusySpin, DiscardOnReject, Parking, RejectDisposition, RejectPolicy,
    WaitStrategy, WorkKind, Yielding,
};
pub use promise::{firing_order, set_firing_order, CompletionCell, FiringOrder, Outcome};
pub use ring::EventPayload;
pub use timer::Cadence;
