//! Slot allocator for block pool arena slots
//!
//! Hands out `BlockId`s for a fixed-size arena. A LIFO free stack reuses
//! recently released slots first; fresh ids come from an atomic cursor.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Index of a byte block in its pool's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct SlotAllocator {
    /// LIFO stack of released ids
    free_stack: Mutex<Vec<u32>>,

    /// Next never-used id
    next_fresh: AtomicU32,

    max_slots: u32,

    allocated_count: AtomicU32,
}

impl SlotAllocator {
    pub(crate) fn new(max_slots: usize) -> Self {
        let max_slots = u32::try_from(max_slots).unwrap_or(u32::MAX);
        Self {
            free_stack: Mutex::new(Vec::new()),
            next_fresh: AtomicU32::new(0),
            max_slots,
            allocated_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn allocate(&self) -> Result<BlockId> {
        {
            let mut free = self.free_stack.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = free.pop() {
                self.allocated_count.fetch_add(1, Ordering::Relaxed);
                return Ok(BlockId(id));
            }
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.max_slots {
                return Err(Error::PoolExhausted {
                    max_blocks: self.max_slots as usize,
                });
            }

            match self.next_fresh.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocated_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(BlockId(current));
                }
                Err(_) => continue,
            }
        }
    }

    pub(crate) fn release(&self, id: BlockId) {
        let mut free = self.free_stack.lock().unwrap_or_else(|e| e.into_inner());
        free.push(id.0);
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Relaxed)
    }

    /// Highest id ever handed out, plus one
    #[inline]
    pub(crate) fn high_water(&self) -> u32 {
        self.next_fresh.load(Ordering::Acquire).min(self.max_slots)
    }

    #[inline]
    pub(crate) fn max_slots(&self) -> u32 {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let alloc = SlotAllocator::new(100);

        let id1 = alloc.allocate().unwrap();
        let id2 = alloc.allocate().unwrap();
        let id3 = alloc.allocate().unwrap();

        assert_eq!(id1.as_u32(), 0);
        assert_eq!(id2.as_u32(), 1);
        assert_eq!(id3.as_u32(), 2);
        assert_eq!(alloc.allocated_count(), 3);
        assert_eq!(alloc.high_water(), 3);
    }

    #[test]
    fn test_release_reuses_lifo() {
        let alloc = SlotAllocator::new(100);

        let id1 = alloc.allocate().unwrap();
        let _id2 = alloc.allocate().unwrap();

        alloc.release(id1);
        assert_eq!(alloc.allocated_count(), 1);

        let id3 = alloc.allocate().unwrap();
        assert_eq!(id3, id1);
        assert_eq!(alloc.allocated_count(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let alloc = SlotAllocator::new(2);
        let _a = alloc.allocate().unwrap();
        let _b = alloc.allocate().unwrap();

        let result = alloc.allocate();
        assert!(matches!(result, Err(Error::PoolExhausted { max_blocks: 2 })));
    }

    #[test]
    fn test_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(SlotAllocator::new(4000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || (0..1000).map(|_| alloc.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<BlockId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert!(alloc.allocate().is_err());
    }
}
