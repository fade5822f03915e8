//! Slot channel: the lock-free hand-off between producer threads and the
//! single consumer.
//!
//! ## Contents
//! - [`slot`]: reusable slots, typed tags, the [`EventPayload`] carried to
//!   the agent, and the [`Work`](slot::Work) items that travel to the
//!   consumer;
//! - [`channel`]: the sequence-addressed circular buffer with claim /
//!   publish / consume / close operations.

mod channel;
mod slot;

pub use slot::EventPayload;

pub(crate) use channel::{ClaimError, SlotChannel};
pub(crate) use slot::{Slot, SlotKind, Work};
