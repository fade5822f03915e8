//! # Reusable ring slots and event payloads.
//!
//! Slots are allocated once at channel creation and recycled forever. A slot
//! carries a typed tag, an owned unit of work, and a small fixed payload used
//! to pass typed events to the [`Agent`](crate::Agent) without a per-event
//! allocation.
//!
//! ## Invariant
//! A slot's fields are **fully cleared** before its sequence number is
//! released back to producers. A retained reference after consumption is a
//! leak; clearing is enforced centrally by the channel's consume path.

use std::any::Any;
use std::sync::Arc;

use crate::timer::ScheduledEntry;

/// Typed slot tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum SlotKind {
    /// Cleared slot; nothing to do.
    #[default]
    Empty,
    /// Slot carries a [`Work`] item.
    Task,
    /// Slot carries an [`EventPayload`] for the agent.
    Event,
    /// Claimed but deliberately unused (submitter lost the shutdown race).
    /// Published so the consumer's sequence scan never stalls.
    Sentinel,
}

/// A unit of work traveling through the ring to the consumer thread.
pub(crate) enum Work {
    /// Immediate task (`execute` / `submit`); result settling, if any, is
    /// captured inside the closure.
    Run(Box<dyn FnOnce() + Send>),
    /// Transfer a scheduled entry into the consumer-owned timer queue.
    Timed(Arc<ScheduledEntry>),
    /// Remove a canceled entry from the timer queue (O(log n) via its stored
    /// heap index).
    CancelTimed(Arc<ScheduledEntry>),
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Work::Run(_) => f.write_str("Work::Run"),
            Work::Timed(e) => write!(f, "Work::Timed(seq={})", e.insertion_seq()),
            Work::CancelTimed(e) => write!(f, "Work::CancelTimed(seq={})", e.insertion_seq()),
        }
    }
}

/// Fixed-shape event payload: two ints, two longs, three owned references.
///
/// Lets callers post typed events to the agent without defining (and heap
/// allocating) a struct per event kind. The integer fields conventionally
/// carry an event type discriminator plus small arguments; the object fields
/// carry anything larger.
///
/// # Example
/// ```
/// use ringloop::EventPayload;
///
/// let payload = EventPayload::new(7)
///     .with_long_a(42)
///     .with_obj_a(String::from("hello"));
/// assert_eq!(payload.int_a, 7);
/// assert_eq!(payload.long_a, 42);
/// ```
#[derive(Default)]
pub struct EventPayload {
    /// Conventionally the event type discriminator.
    pub int_a: i32,
    pub int_b: i32,
    pub long_a: i64,
    pub long_b: i64,
    pub obj_a: Option<Box<dyn Any + Send>>,
    pub obj_b: Option<Box<dyn Any + Send>>,
    pub obj_c: Option<Box<dyn Any + Send>>,
}

impl EventPayload {
    /// Creates a payload with `int_a` set to `event_type`.
    #[must_use]
    pub fn new(event_type: i32) -> Self {
        Self {
            int_a: event_type,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_int_b(mut self, v: i32) -> Self {
        self.int_b = v;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_long_a(mut self, v: i64) -> Self {
        self.long_a = v;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_long_b(mut self, v: i64) -> Self {
        self.long_b = v;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_obj_a(mut self, v: impl Any + Send) -> Self {
        self.obj_a = Some(Box::new(v));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_obj_b(mut self, v: impl Any + Send) -> Self {
        self.obj_b = Some(Box::new(v));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_obj_c(mut self, v: impl Any + Send) -> Self {
        self.obj_c = Some(Box::new(v));
        self
    }

    /// Takes `obj_a` out, downcast to `T` (None if absent or wrong type).
    pub fn take_obj_a<T: Any>(&mut self) -> Option<Box<T>> {
        self.obj_a.take().and_then(|b| b.downcast::<T>().ok())
    }

    /// Takes `obj_b` out, downcast to `T`.
    pub fn take_obj_b<T: Any>(&mut self) -> Option<Box<T>> {
        self.obj_b.take().and_then(|b| b.downcast::<T>().ok())
    }

    /// Takes `obj_c` out, downcast to `T`.
    pub fn take_obj_c<T: Any>(&mut self) -> Option<Box<T>> {
        self.obj_c.take().and_then(|b| b.downcast::<T>().ok())
    }

    /// Drops all references and zeroes the scalar fields.
    pub(crate) fn clear(&mut self) {
        self.int_a = 0;
        self.int_b = 0;
        self.long_a = 0;
        self.long_b = 0;
        self.obj_a = None;
        self.obj_b = None;
        self.obj_c = None;
    }
}

impl std::fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPayload")
            .field("int_a", &self.int_a)
            .field("int_b", &self.int_b)
            .field("long_a", &self.long_a)
            .field("long_b", &self.long_b)
            .field("obj_a", &self.obj_a.is_some())
            .field("obj_b", &self.obj_b.is_some())
            .field("obj_c", &self.obj_c.is_some())
            .finish()
    }
}

/// One reusable ring cell.
#[derive(Default, Debug)]
pub(crate) struct Slot {
    pub(crate) kind: SlotKind,
    pub(crate) work: Option<Work>,
    pub(crate) payload: EventPayload,
}

impl Slot {
    pub(crate) fn set_task(&mut self, work: Work) {
        self.kind = SlotKind::Task;
        self.work = Some(work);
    }

    pub(crate) fn set_event(&mut self, payload: EventPayload) {
        self.kind = SlotKind::Event;
        self.payload = payload;
    }

    pub(crate) fn set_sentinel(&mut self) {
        self.kind = SlotKind::Sentinel;
    }

    /// Resets every field. Called by the channel before the sequence is
    /// released; callers must not retain references into the slot.
    pub(crate) fn clear(&mut self) {
        self.kind = SlotKind::Empty;
        self.work = None;
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_builders_and_take() {
        let mut p = EventPayload::new(3)
            .with_int_b(4)
            .with_long_a(5)
            .with_long_b(6)
            .with_obj_a(String::from("a"))
            .with_obj_b(17_u64);

        assert_eq!(p.int_a, 3);
        assert_eq!(*p.take_obj_a::<String>().unwrap(), "a");
        // wrong type: consumed but None
        assert!(p.take_obj_b::<String>().is_none());
        assert!(p.obj_b.is_none());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut slot = Slot::default();
        slot.set_task(Work::Run(Box::new(|| {})));
        slot.payload = EventPayload::new(9).with_obj_c(1_u8);

        slot.clear();
        assert_eq!(slot.kind, SlotKind::Empty);
        assert!(slot.work.is_none());
        assert_eq!(slot.payload.int_a, 0);
        assert!(slot.payload.obj_c.is_none());
    }
}
