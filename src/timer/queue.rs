//! # Indexable binary heap of scheduled entries.
//!
//! A min-heap keyed by `(trigger time, priority lane, insertion sequence)`
//! ascending. Every entry stores its own heap index back-pointer, so
//! arbitrary removal is O(log n) instead of a linear scan.
//!
//! Touched only by the consumer thread. A stale or corrupt back-pointer is a
//! programming defect, not a runtime condition — it trips a debug assertion
//! rather than an error path.

use std::sync::Arc;

use super::entry::{ScheduledEntry, NO_HEAP_INDEX};

/// Time-ordered queue of pending scheduled entries.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: Vec<Arc<ScheduledEntry>>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts an entry and records its position.
    pub(crate) fn add(&mut self, entry: Arc<ScheduledEntry>) {
        let idx = self.heap.len();
        entry.set_heap_index(idx);
        self.heap.push(entry);
        self.sift_up(idx);
    }

    /// The entry with the smallest key, if any.
    pub(crate) fn peek(&self) -> Option<&Arc<ScheduledEntry>> {
        self.heap.first()
    }

    /// Removes and returns the smallest entry.
    pub(crate) fn poll(&mut self) -> Option<Arc<ScheduledEntry>> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop().expect("heap checked non-empty");
        entry.set_heap_index(NO_HEAP_INDEX);
        if !self.heap.is_empty() {
            self.heap[0].set_heap_index(0);
            self.sift_down(0);
        }
        Some(entry)
    }

    /// Removes a specific entry via its stored heap index. Returns `false`
    /// if the entry is not currently queued (already fired or removed).
    pub(crate) fn remove(&mut self, entry: &Arc<ScheduledEntry>) -> bool {
        let idx = entry.heap_index();
        if idx == NO_HEAP_INDEX || idx >= self.heap.len() {
            return false;
        }
        debug_assert!(
            Arc::ptr_eq(&self.heap[idx], entry),
            "heap back-pointer out of sync"
        );
        if !Arc::ptr_eq(&self.heap[idx], entry) {
            return false;
        }

        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        let removed = self.heap.pop().expect("heap checked non-empty");
        removed.set_heap_index(NO_HEAP_INDEX);
        if idx < self.heap.len() {
            self.heap[idx].set_heap_index(idx);
            // the moved-in element may violate the property in either
            // direction relative to its new neighborhood
            self.sift_down(idx);
            self.sift_up(idx);
        }
        true
    }

    /// Empties the queue, returning the entries in arbitrary order (the
    /// shutdown drain cancels them one by one).
    pub(crate) fn drain(&mut self) -> Vec<Arc<ScheduledEntry>> {
        for e in &self.heap {
            e.set_heap_index(NO_HEAP_INDEX);
        }
        std::mem::take(&mut self.heap)
    }

    fn less(&self, a: usize, b: usize) -> bool {
        self.heap[a].key() < self.heap[b].key()
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = idx * 2 + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < self.heap.len() && self.less(right, left) {
                smallest = right;
            }
            if !self.less(smallest, idx) {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.heap[a].set_heap_index(a);
        self.heap[b].set_heap_index(b);
    }
}
