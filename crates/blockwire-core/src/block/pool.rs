//! Block pool: reference-counted byte blocks that can spill to disk.
//!
//! Each byte block lives in an arena slot holding two counters and a
//! residency state:
//!
//! - `handles` counts live `ByteBlockPtr`s. The last one to drop frees
//!   the memory or swap extent and returns the slot id.
//! - `pins` counts live `PinnedByteBlock`s. A block with pins is always
//!   resident and its memory address does not change.
//!
//! Eviction moves an unpinned block's bytes into the swap file. Pinning
//! an evicted block reads it back; concurrent pinners wait on the slot's
//! condition variable while a load or store is in flight.

use std::fmt;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use super::pin::PinnedByteBlock;
use super::slot::{BlockId, SlotAllocator};
use super::swap::{SwapExtent, SwapFile};
use crate::env::{env_get, env_get_opt};
use crate::error::{Error, Result};

/// Default arena size
pub const DEFAULT_MAX_BLOCKS: usize = 16384;

/// Block pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live byte blocks
    pub max_blocks: usize,
    /// Directory for the swap file; system temp dir when unset
    pub swap_dir: Option<PathBuf>,
}

impl PoolConfig {
    /// Defaults overridden by `BLOCKWIRE_MAX_BLOCKS` and `BLOCKWIRE_SWAP_DIR`
    pub fn from_env() -> Self {
        Self {
            max_blocks: env_get("BLOCKWIRE_MAX_BLOCKS", DEFAULT_MAX_BLOCKS).max(1),
            swap_dir: env_get_opt::<PathBuf>("BLOCKWIRE_SWAP_DIR"),
        }
    }

    /// Compiled-in defaults, ignoring the environment
    pub fn new() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
            swap_dir: None,
        }
    }

    pub fn max_blocks(mut self, n: usize) -> Self {
        self.max_blocks = n.max(1);
        self
    }

    pub fn swap_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.swap_dir = Some(dir.into());
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Where a byte block's bytes currently are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Resident,
    /// Being read back from swap
    Loading,
    OnDisk,
    /// Being written out to swap
    Saving,
}

/// Pool counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: usize,
    pub pinned: usize,
    pub resident_bytes: usize,
    pub swapped_bytes: u64,
    pub loads: u64,
    pub stores: u64,
}

enum SlotState {
    Free,
    Resident(Box<[u8]>),
    Loading,
    OnDisk(SwapExtent),
    Saving,
}

impl SlotState {
    fn residency(&self) -> Option<Residency> {
        match self {
            SlotState::Free => None,
            SlotState::Resident(_) => Some(Residency::Resident),
            SlotState::Loading => Some(Residency::Loading),
            SlotState::OnDisk(_) => Some(Residency::OnDisk),
            SlotState::Saving => Some(Residency::Saving),
        }
    }

    fn in_flight(&self) -> bool {
        matches!(self, SlotState::Loading | SlotState::Saving)
    }
}

struct Slot {
    handles: AtomicUsize,
    pins: AtomicUsize,
    size: AtomicUsize,
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            handles: AtomicUsize::new(0),
            pins: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            state: Mutex::new(SlotState::Free),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        self.ready.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

struct PoolInner {
    slots: Box<[Slot]>,
    ids: SlotAllocator,
    swap: SwapFile,
    resident_bytes: AtomicUsize,
    loads: AtomicU64,
    stores: AtomicU64,
}

/// Shared pool of byte blocks.
///
/// Cloning is cheap; all clones refer to the same arena and swap file.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

impl BlockPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        let swap = SwapFile::create(config.swap_dir.as_deref())?;
        debug!(max_blocks = config.max_blocks, "block pool created");
        Ok(Self::with_swap(config.max_blocks, swap))
    }

    fn with_swap(max_blocks: usize, swap: SwapFile) -> Self {
        let slots = (0..max_blocks).map(|_| Slot::new()).collect();
        Self {
            inner: Arc::new(PoolInner {
                slots,
                ids: SlotAllocator::new(max_blocks),
                swap,
                resident_bytes: AtomicUsize::new(0),
                loads: AtomicU64::new(0),
                stores: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a zero-filled resident byte block of `size` bytes
    pub fn allocate(&self, size: usize) -> Result<ByteBlockPtr> {
        self.install(vec![0u8; size].into_boxed_slice())
    }

    /// Allocate a byte block holding a copy of `bytes`
    pub fn from_slice(&self, bytes: &[u8]) -> Result<ByteBlockPtr> {
        self.install(Box::from(bytes))
    }

    fn install(&self, data: Box<[u8]>) -> Result<ByteBlockPtr> {
        let id = self.inner.ids.allocate()?;
        let slot = self.inner.slot(id);
        let size = data.len();
        {
            let mut state = slot.lock();
            debug_assert!(matches!(*state, SlotState::Free));
            *state = SlotState::Resident(data);
            slot.size.store(size, Ordering::Release);
            slot.pins.store(0, Ordering::Release);
            slot.handles.store(1, Ordering::Release);
        }
        self.inner.resident_bytes.fetch_add(size, Ordering::Relaxed);
        trace!(block = %id, size, "byte block allocated");
        Ok(ByteBlockPtr {
            pool: self.clone(),
            id,
        })
    }

    /// Spill `block` to swap if it is resident and unpinned
    pub fn evict(&self, block: &ByteBlockPtr) -> Result<bool> {
        debug_assert!(Arc::ptr_eq(&self.inner, &block.pool.inner));
        Ok(self.inner.evict(block.id)?.is_some())
    }

    /// Evict unpinned resident blocks until at least `target_bytes` have
    /// been written out or no candidates remain. Returns bytes evicted.
    pub fn evict_unpinned(&self, target_bytes: usize) -> Result<usize> {
        let mut evicted = 0usize;
        for raw in 0..self.inner.ids.high_water() {
            if evicted >= target_bytes {
                break;
            }
            let id = BlockId::from_raw(raw);
            if self.inner.slot(id).handles.load(Ordering::Acquire) == 0 {
                continue;
            }
            if let Some(n) = self.inner.evict(id)? {
                evicted += n;
            }
        }
        Ok(evicted)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let high = inner.ids.high_water();
        let pinned = (0..high)
            .filter(|&raw| inner.slot(BlockId::from_raw(raw)).pins.load(Ordering::Relaxed) > 0)
            .count();
        PoolStats {
            allocated: inner.ids.allocated_count() as usize,
            pinned,
            resident_bytes: inner.resident_bytes.load(Ordering::Relaxed),
            swapped_bytes: inner.swap.bytes_in_use(),
            loads: inner.loads.load(Ordering::Relaxed),
            stores: inner.stores.load(Ordering::Relaxed),
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.inner.ids.max_slots() as usize
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("max_blocks", &self.max_blocks())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolInner {
    #[inline]
    fn slot(&self, id: BlockId) -> &Slot {
        &self.slots[id.as_usize()]
    }

    /// Make `id` resident and take a pin on it.
    ///
    /// Returns the stable address and length of the block's bytes.
    fn pin(&self, id: BlockId) -> Result<(NonNull<u8>, usize)> {
        let slot = self.slot(id);
        let mut state = slot.lock();
        loop {
            match &mut *state {
                SlotState::Resident(data) => {
                    let len = data.len();
                    let ptr = NonNull::new(data.as_mut_ptr()).unwrap_or(NonNull::dangling());
                    slot.pins.fetch_add(1, Ordering::AcqRel);
                    return Ok((ptr, len));
                }
                SlotState::Loading | SlotState::Saving => {
                    state = slot.wait(state);
                }
                SlotState::OnDisk(ext) => {
                    let ext = *ext;
                    *state = SlotState::Loading;
                    drop(state);

                    let mut data = vec![0u8; ext.len].into_boxed_slice();
                    let loaded = self.swap.load(ext, &mut data);

                    state = slot.lock();
                    match loaded {
                        Ok(()) => {
                            self.swap.release(ext);
                            self.resident_bytes.fetch_add(ext.len, Ordering::Relaxed);
                            self.loads.fetch_add(1, Ordering::Relaxed);
                            *state = SlotState::Resident(data);
                            slot.ready.notify_all();
                            trace!(block = %id, len = ext.len, "byte block reloaded");
                        }
                        Err(source) => {
                            *state = SlotState::OnDisk(ext);
                            slot.ready.notify_all();
                            warn!(block = %id, error = %source, "byte block reload failed");
                            return Err(Error::Reload { block: id, source });
                        }
                    }
                }
                SlotState::Free => {
                    // a live handle keeps the slot allocated
                    unreachable!("pin on free slot {id}");
                }
            }
        }
    }

    /// Write an unpinned resident block to swap.
    ///
    /// `Ok(None)` when the block is pinned, already evicted, or in flight.
    fn evict(&self, id: BlockId) -> Result<Option<usize>> {
        let slot = self.slot(id);
        let mut state = slot.lock();
        if slot.pins.load(Ordering::Acquire) > 0 {
            return Ok(None);
        }
        let data = match std::mem::replace(&mut *state, SlotState::Saving) {
            SlotState::Resident(data) => data,
            other => {
                *state = other;
                return Ok(None);
            }
        };
        drop(state);

        let stored = self.swap.store(&data);

        let mut state = slot.lock();
        let result = match stored {
            Ok(ext) => {
                self.resident_bytes.fetch_sub(data.len(), Ordering::Relaxed);
                self.stores.fetch_add(1, Ordering::Relaxed);
                *state = SlotState::OnDisk(ext);
                trace!(block = %id, len = ext.len, "byte block evicted");
                Ok(Some(ext.len))
            }
            Err(source) => {
                *state = SlotState::Resident(data);
                Err(Error::Swap {
                    op: "write",
                    source,
                })
            }
        };
        slot.ready.notify_all();
        result
    }

    /// Free the slot after its last handle dropped
    fn reclaim(&self, id: BlockId) {
        let slot = self.slot(id);
        let mut state = slot.lock();
        while state.in_flight() {
            state = slot.wait(state);
        }
        match std::mem::replace(&mut *state, SlotState::Free) {
            SlotState::Resident(data) => {
                self.resident_bytes.fetch_sub(data.len(), Ordering::Relaxed);
            }
            SlotState::OnDisk(ext) => self.swap.release(ext),
            _ => {}
        }
        slot.size.store(0, Ordering::Release);
        drop(state);
        self.ids.release(id);
        trace!(block = %id, "byte block freed");
    }
}

/// Counted handle to a byte block.
///
/// Cloning adds a handle; dropping the last handle frees the block.
pub struct ByteBlockPtr {
    pool: BlockPool,
    id: BlockId,
}

impl ByteBlockPtr {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Size in bytes, fixed at allocation
    #[inline]
    pub fn size(&self) -> usize {
        self.slot().size.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    /// Number of live handles, including this one
    pub fn handle_count(&self) -> usize {
        self.slot().handles.load(Ordering::Acquire)
    }

    /// Number of live pins
    pub fn pin_count(&self) -> usize {
        self.slot().pins.load(Ordering::Acquire)
    }

    pub fn residency(&self) -> Residency {
        self.slot()
            .lock()
            .residency()
            .unwrap_or(Residency::Resident)
    }

    /// Pin the block in memory, reloading it from swap if needed.
    pub fn pin(&self) -> Result<PinnedByteBlock> {
        let (ptr, len) = self.pool.inner.pin(self.id)?;
        Ok(PinnedByteBlock::new(self.clone(), ptr, len))
    }

    /// Spill this block to swap if it is resident and unpinned.
    ///
    /// Returns whether the block was written out.
    pub fn evict(&self) -> Result<bool> {
        self.pool.evict(self)
    }

    #[inline]
    fn slot(&self) -> &Slot {
        self.pool.inner.slot(self.id)
    }

    pub(crate) fn release_pin(&self) {
        self.slot().pins.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn add_pin(&self) {
        self.slot().pins.fetch_add(1, Ordering::AcqRel);
    }
}

impl Clone for ByteBlockPtr {
    fn clone(&self) -> Self {
        self.slot().handles.fetch_add(1, Ordering::AcqRel);
        Self {
            pool: self.pool.clone(),
            id: self.id,
        }
    }
}

impl Drop for ByteBlockPtr {
    fn drop(&mut self) {
        if self.slot().handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pool.inner.reclaim(self.id);
        }
    }
}

impl PartialEq for ByteBlockPtr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool.inner, &other.pool.inner) && self.id == other.id
    }
}

impl Eq for ByteBlockPtr {}

impl fmt::Debug for ByteBlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBlockPtr")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("handles", &self.handle_count())
            .field("pins", &self.pin_count())
            .finish()
    }
}
