//! # Agent hooks — the loop's external collaborator.
//!
//! An [`Agent`] is user code woven into the consumer thread's lifecycle:
//!
//! ```text
//! consumer thread:
//!   on_start(&loop)      — once, before the first iteration; an Err is FATAL
//!   loop {
//!     ... run timer + ring batches ...
//!     on_event(&mut payload)   — for every Event slot published via post_event
//!     update()                 — once per batch boundary
//!   }
//!   on_shutdown()        — once, after the final drain
//! ```
//!
//! ## Rules
//! - `on_start` failing (Err or panic) aborts the thread: the loop goes
//!   straight into its shutdown drain.
//! - `on_event` / `update` / `on_shutdown` panics are caught, logged, and the
//!   loop continues.
//! - All hooks run on the consumer thread; they may submit further work
//!   through the loop handle (which uses non-blocking claims there).

use crate::core::EventLoop;
use crate::error::TaskError;
use crate::ring::EventPayload;

/// Lifecycle callbacks invoked by the consumer thread.
///
/// Every method has a no-op default, so implementors override only what they
/// need.
pub trait Agent: Send + 'static {
    /// Called once on the consumer thread before the first iteration.
    ///
    /// Returning `Err` is fatal: the loop never enters its steady state and
    /// transitions directly to shutting down.
    fn on_start(&mut self, lp: &EventLoop) -> Result<(), TaskError> {
        let _ = lp;
        Ok(())
    }

    /// Called for each typed event published via
    /// [`post_event`](crate::EventLoop::post_event). The payload is cleared
    /// when the hook returns; take what you need out of it.
    fn on_event(&mut self, payload: &mut EventPayload) {
        let _ = payload;
    }

    /// Called at every batch boundary, whether or not the batch ran anything.
    fn update(&mut self) {}

    /// Called once after the final drain, before the loop terminates.
    fn on_shutdown(&mut self) {}
}

/// Agent that does nothing; the default when none is supplied.
#[derive(Debug, Default)]
pub struct NoopAgent;

impl Agent for NoopAgent {}
