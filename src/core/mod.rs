//! Executor core: lifecycle and the consumer loop.
//!
//! The public API from this module is [`EventLoop`] (with its
//! [`EventLoopBuilder`]), the [`Scheduled`] task handle, and the
//! [`LoopState`] lifecycle enum.
//!
//! Internal modules:
//! - [`handle`]: the producer-facing submission paths and lifecycle requests;
//! - [`runner`]: the consumer thread's iteration (timers + ring + agent);
//! - [`shutdown`]: the deadlock-free final drain;
//! - [`state`]: the monotonic CAS state machine.

mod builder;
mod handle;
mod runner;
mod shutdown;
mod state;

pub use builder::EventLoopBuilder;
pub use handle::{EventLoop, Scheduled};
pub use state::LoopState;
