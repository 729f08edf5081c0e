//! BinaryHeap timer queue
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy cancellation)
//! - Pop due: O(log n) per timer
//! - Next deadline: O(1) amortized
//!
//! # Cancellation
//!
//! Cancelled handles go into a set and are skipped when they reach the top
//! of the heap. A timer that is cancelled while its entry is out of the
//! heap (its callback is running) is caught by `requeue`.

use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use super::entry::{HeapEntry, TimerEntry};
use super::{TimerHandle, TimerStats};

/// Min-heap of timers, owned by a single dispatcher thread
pub(crate) struct TimerQueue<C> {
    heap: BinaryHeap<HeapEntry<C>>,

    /// Handles scheduled or currently firing
    live: HashSet<TimerHandle>,

    /// Cancelled but not yet purged
    cancelled: HashSet<TimerHandle>,

    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl<C> TimerQueue<C> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            live: HashSet::with_capacity(capacity),
            cancelled: HashSet::new(),
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    pub(crate) fn push(&mut self, entry: TimerEntry<C>) -> TimerHandle {
        let handle = entry.handle;
        self.live.insert(handle);
        self.heap.push(HeapEntry(entry));
        self.total_inserted += 1;
        handle
    }

    /// Mark a timer cancelled. Returns false if it is unknown, already
    /// cancelled, or already retired.
    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        if !self.live.contains(&handle) {
            return false;
        }
        let inserted = self.cancelled.insert(handle);
        if inserted {
            self.total_cancelled += 1;
        }
        inserted
    }

    /// Pop the earliest timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerEntry<C>> {
        self.purge_cancelled_top();
        if self.heap.peek()?.0.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?.0;
        self.total_fired += 1;
        Some(entry)
    }

    /// Put a fired timer back for its next period, unless it was
    /// cancelled while out of the heap.
    pub(crate) fn requeue(&mut self, mut entry: TimerEntry<C>) {
        if self.cancelled.remove(&entry.handle) {
            self.live.remove(&entry.handle);
            return;
        }
        entry.advance();
        self.heap.push(HeapEntry(entry));
    }

    /// Forget a fired timer that will not run again
    pub(crate) fn retire(&mut self, handle: TimerHandle) {
        self.live.remove(&handle);
        self.cancelled.remove(&handle);
    }

    /// Deadline of the earliest live timer
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.purge_cancelled_top();
        self.heap.peek().map(|e| e.0.deadline)
    }

    /// Number of scheduled, non-cancelled timers
    pub(crate) fn len(&self) -> usize {
        self.live.len().saturating_sub(self.cancelled.len())
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn stats(&self) -> TimerStats {
        TimerStats {
            active: self.len(),
            pending_cancellations: self.cancelled.len(),
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }

    fn purge_cancelled_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            let handle = top.0.handle;
            if !self.cancelled.remove(&handle) {
                break;
            }
            self.live.remove(&handle);
            self.heap.pop();
        }
    }
}
