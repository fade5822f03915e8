//! # Lock-free slot channel (many producers, one consumer).
//!
//! A fixed-capacity circular buffer of reusable [`Slot`]s addressed by a
//! monotonically increasing 64-bit sequence number.
//!
//! ```text
//! producers:  claim ──► write slot ──► publish (per-slot marker, Release)
//! consumer:   scan markers (Acquire) ──► consume ──► clear ──► release seq
//! ```
//!
//! ## Protocol
//! - **Claim**: a CAS loop on the claim cursor hands each producer a unique
//!   sequence. A sequence `s` is claimable only while `s < released +
//!   capacity`, so a slot is never written before the consumer has cleared
//!   its previous occupant ("gating").
//! - **Publish**: after writing the slot, the producer stores the sequence
//!   into that slot's published marker. Every claimed sequence MUST be
//!   published — on the failure path as a sentinel — or the consumer's
//!   contiguous scan would stall forever.
//! - **Consume**: only the consumer reads published slots; it clears each
//!   slot before advancing the released cursor, which is what hands the slot
//!   back to producers.
//!
//! This single-writer-per-slot / single-reader-overall discipline is what
//! permits lock-freedom: the two `unsafe` blocks below rely on it.
//!
//! ## Shutdown
//! [`close`](SlotChannel::close) makes claims fail with
//! [`ClaimError::Closed`], which unblocks producers parked on a full ring.
//! Producers remain capacity-gated even when closed: late sequences still
//! map to cleared, unaliased slots. (The gating bound is what keeps slot
//! access data-race free, so it is never lifted; closing substitutes for
//! removing the consumer from the gating set.)

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use super::slot::Slot;

/// Marker value meaning "this slot has never been published".
///
/// Unambiguous: slot `i` only ever carries sequences `i, i+cap, i+2cap, …`,
/// and a real sequence never reaches `u64::MAX`.
const NEVER_PUBLISHED: u64 = u64::MAX;

/// Why a claim failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClaimError {
    /// All capacity is claimed and not yet released.
    Full,
    /// The channel was closed (loop shutting down).
    Closed,
}

/// Lock-free sequence-addressed circular buffer.
pub(crate) struct SlotChannel {
    mask: u64,
    slots: Box<[UnsafeCell<Slot>]>,
    /// Per-slot published marker; holds the sequence last published there.
    published: Box<[CachePadded<AtomicU64>]>,
    /// Next sequence to hand out to a claiming producer.
    claim: CachePadded<AtomicU64>,
    /// Next sequence the consumer has not yet consumed-and-cleared.
    released: CachePadded<AtomicU64>,
    closed: AtomicBool,
}

// SAFETY: `slots` is aliased across threads, but the sequence protocol
// guarantees exclusive access: a producer touches a slot only between its
// own claim and publish; the consumer touches it only between observing the
// published marker and advancing `released`. The Release/Acquire pairs on
// `published` and `released` order those accesses.
unsafe impl Send for SlotChannel {}
unsafe impl Sync for SlotChannel {}

impl SlotChannel {
    /// Creates a channel with `capacity` slots. `capacity` must be a power
    /// of two (normalized by [`LoopConfig`](crate::LoopConfig)).
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(Slot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let published = (0..capacity)
            .map(|_| CachePadded::new(AtomicU64::new(NEVER_PUBLISHED)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            mask: capacity as u64 - 1,
            slots,
            published,
            claim: CachePadded::new(AtomicU64::new(0)),
            released: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.mask + 1
    }

    #[inline]
    fn index(&self, seq: u64) -> usize {
        (seq & self.mask) as usize
    }

    /// Non-blocking claim. Mandatory on the consumer thread (a blocking
    /// claim there would wait on its own progress).
    pub(crate) fn try_claim(&self) -> Result<u64, ClaimError> {
        let mut next = self.claim.load(Ordering::Relaxed);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(ClaimError::Closed);
            }
            let released = self.released.load(Ordering::Acquire);
            if next >= released + self.capacity() {
                return Err(ClaimError::Full);
            }
            match self.claim.compare_exchange_weak(
                next,
                next + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(next),
                Err(current) => next = current,
            }
        }
    }

    /// Blocking claim for producer threads: spins, yields, then sleeps until
    /// capacity frees up. Fails only when the channel closes.
    pub(crate) fn claim(&self) -> Result<u64, ClaimError> {
        let backoff = Backoff::new();
        loop {
            match self.try_claim() {
                Ok(seq) => return Ok(seq),
                Err(ClaimError::Closed) => return Err(ClaimError::Closed),
                Err(ClaimError::Full) => {
                    if backoff.is_completed() {
                        std::thread::sleep(std::time::Duration::from_micros(50));
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    /// Writes the claimed slot through `f`, then publishes `seq`.
    pub(crate) fn publish_with(&self, seq: u64, f: impl FnOnce(&mut Slot)) {
        let idx = self.index(seq);
        // SAFETY: `seq` was claimed by this caller and not yet published, so
        // no other producer holds this slot, and the consumer will not read
        // it until the marker store below.
        unsafe { f(&mut *self.slots[idx].get()) };
        self.published[idx].store(seq, Ordering::Release);
    }

    /// Publishes a claimed-but-unused sequence as an inert marker so the
    /// consumer's scan can pass over it. Never silently dropped.
    pub(crate) fn publish_sentinel(&self, seq: u64) {
        self.publish_with(seq, Slot::set_sentinel);
    }

    /// First sequence in `[from, up_to)` that is NOT yet published; equals
    /// `up_to` when the whole range is ready. Consumer-side scan.
    pub(crate) fn highest_published(&self, from: u64, up_to: u64) -> u64 {
        let mut seq = from;
        while seq < up_to && self.published[self.index(seq)].load(Ordering::Acquire) == seq {
            seq += 1;
        }
        seq
    }

    /// Consumes one published sequence: hands the slot to `f`, clears it,
    /// and releases the sequence back to producers. Consumer thread only.
    pub(crate) fn consume_with<R>(&self, seq: u64, f: impl FnOnce(&mut Slot) -> R) -> R {
        let idx = self.index(seq);
        debug_assert_eq!(
            self.published[idx].load(Ordering::Acquire),
            seq,
            "consuming an unpublished sequence"
        );
        // SAFETY: the marker equals `seq`, so the producer's writes are
        // visible (Acquire) and finished; producers cannot reclaim this slot
        // until the `released` store below.
        let slot = unsafe { &mut *self.slots[idx].get() };
        let out = f(slot);
        slot.clear();
        self.released.store(seq + 1, Ordering::Release);
        out
    }

    /// Snapshot of the claim cursor (sequences below it are claimed).
    #[inline]
    pub(crate) fn claim_cursor(&self) -> u64 {
        self.claim.load(Ordering::Acquire)
    }

    /// Next sequence the consumer will look at.
    #[inline]
    pub(crate) fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// `true` once every sequence claimed below `limit` has been published.
    pub(crate) fn all_published_below(&self, limit: u64) -> bool {
        let from = self.released();
        self.highest_published(from, limit) == limit
    }

    /// Makes all further claims fail with [`ClaimError::Closed`], waking
    /// producers parked on a full ring into the rejection path.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::slot::{SlotKind, Work};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn run_work(slot: &mut Slot) {
        if let Some(Work::Run(f)) = slot.work.take() {
            f();
        }
    }

    #[test]
    fn test_claim_publish_consume_with_wraparound() {
        let ch = SlotChannel::new(8);
        let hits = Arc::new(AtomicUsize::new(0));

        for round in 0..100_u64 {
            let seq = ch.try_claim().unwrap();
            assert_eq!(seq, round);
            let hits2 = Arc::clone(&hits);
            ch.publish_with(seq, |slot| {
                slot.set_task(Work::Run(Box::new(move || {
                    hits2.fetch_add(1, Ordering::Relaxed);
                })));
            });

            let high = ch.highest_published(seq, seq + 1);
            assert_eq!(high, seq + 1);
            ch.consume_with(seq, run_work);
        }
        assert_eq!(hits.load(Ordering::Relaxed), 100);
        assert_eq!(ch.released(), 100);
    }

    #[test]
    fn test_try_claim_fails_on_full_ring() {
        let ch = SlotChannel::new(8);
        for _ in 0..8 {
            let seq = ch.try_claim().unwrap();
            ch.publish_sentinel(seq);
        }
        assert_eq!(ch.try_claim(), Err(ClaimError::Full));

        // releasing one slot frees exactly one claim
        ch.consume_with(0, |slot| assert_eq!(slot.kind, SlotKind::Sentinel));
        assert_eq!(ch.try_claim(), Ok(8));
    }

    #[test]
    fn test_closed_channel_rejects_claims() {
        let ch = SlotChannel::new(8);
        ch.close();
        assert!(ch.is_closed());
        assert_eq!(ch.try_claim(), Err(ClaimError::Closed));
        assert_eq!(ch.claim(), Err(ClaimError::Closed));
    }

    #[test]
    fn test_sentinel_slots_scan_as_published() {
        let ch = SlotChannel::new(8);
        let a = ch.try_claim().unwrap();
        let b = ch.try_claim().unwrap();
        // publish out of order: b first
        ch.publish_sentinel(b);
        assert_eq!(ch.highest_published(0, 2), 0, "gap must stall the scan");
        ch.publish_sentinel(a);
        assert_eq!(ch.highest_published(0, 2), 2);
        assert!(ch.all_published_below(2));
    }

    #[test]
    fn test_multi_producer_counts_add_up() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let ch = Arc::new(SlotChannel::new(64));
        let ran = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let ch = Arc::clone(&ch);
                let ran = Arc::clone(&ran);
                std::thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        let seq = ch.claim().unwrap();
                        let ran2 = Arc::clone(&ran);
                        ch.publish_with(seq, |slot| {
                            slot.set_task(Work::Run(Box::new(move || {
                                ran2.fetch_add(1, Ordering::Relaxed);
                            })));
                        });
                    }
                })
            })
            .collect();

        // consumer: drain until every produced task ran
        let expected = PRODUCERS * PER_PRODUCER;
        let mut next = 0_u64;
        while ran.load(Ordering::Relaxed) < expected {
            let high = ch.highest_published(next, ch.claim_cursor());
            while next < high {
                ch.consume_with(next, run_work);
                next += 1;
            }
            std::hint::spin_loop();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ran.load(Ordering::Relaxed), expected);
        assert_eq!(ch.released(), expected as u64);
    }
}
