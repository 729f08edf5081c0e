//! Timer handles and heap entries

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stand-in deadline offset for intervals too large for `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `base + after`, saturating to a deadline decades away on overflow
pub(crate) fn deadline_after(base: Instant, after: Duration) -> Instant {
    base.checked_add(after)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Global counter for timer handles
static NEXT_TIMER_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) u64);

impl TimerHandle {
    /// Allocate a new unique handle
    pub fn new() -> Self {
        Self(NEXT_TIMER_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled timer
pub(crate) struct TimerEntry<C> {
    pub(crate) handle: TimerHandle,
    /// Next fire time
    pub(crate) deadline: Instant,
    /// Restart interval
    pub(crate) interval: Duration,
    pub(crate) callback: C,
}

impl<C> TimerEntry<C> {
    /// First fire one interval after `now`
    pub(crate) fn new(handle: TimerHandle, now: Instant, interval: Duration, callback: C) -> Self {
        Self {
            handle,
            deadline: deadline_after(now, interval),
            interval,
            callback,
        }
    }

    /// Advance to the next period. Measured from the previous deadline,
    /// not from when the callback actually ran.
    #[inline]
    pub(crate) fn advance(&mut self) {
        self.deadline = deadline_after(self.deadline, self.interval);
    }
}

/// Wrapper for heap ordering (min-heap by deadline, then handle)
pub(crate) struct HeapEntry<C>(pub(crate) TimerEntry<C>);

impl<C> PartialEq for HeapEntry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl<C> Eq for HeapEntry<C> {}

impl<C> PartialOrd for HeapEntry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for HeapEntry<C> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // reversed: BinaryHeap is a max-heap
        match other.0.deadline.cmp(&self.0.deadline) {
            CmpOrdering::Equal => other.0.handle.cmp(&self.0.handle),
            ord => ord,
        }
    }
}
