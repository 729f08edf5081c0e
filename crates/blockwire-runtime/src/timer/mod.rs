//! Timer subsystem
//!
//! Timers live in a min-heap owned by the dispatcher. Each cycle pops
//! every due timer, runs it on the loop thread, and pushes the ones whose
//! callback asked to continue back in one interval after their previous
//! fire time.
//!
//! ```text
//!   add_timer ──► TimerQueue (BinaryHeap, lazy cancel)
//!                      │
//!   dispatch() ──pop_due(now)──► callback(&mut Dispatcher) -> bool
//!                      ▲                        │
//!                      └──── requeue (true) ◄───┘
//! ```

mod entry;
mod queue;

pub use entry::TimerHandle;
pub(crate) use entry::{deadline_after, TimerEntry};
pub(crate) use queue::TimerQueue;

/// Timer queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Scheduled, non-cancelled timers
    pub active: usize,
    /// Cancelled but not yet removed from the heap
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}
