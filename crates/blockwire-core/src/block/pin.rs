//! Pinned byte blocks

use std::fmt;
use std::ptr::NonNull;

use super::pool::ByteBlockPtr;

/// A byte block that is guaranteed resident for the lifetime of this value.
///
/// Holds one handle and one pin on the underlying block. Cloning adds a
/// pin; dropping removes it. The bytes may be read from any thread.
pub struct PinnedByteBlock {
    block: ByteBlockPtr,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the pointed-to bytes stay resident and at a fixed address while
// the pin count is non-zero, and mutable access requires `&mut self` on the
// only handle and only pin (see `get_mut`).
unsafe impl Send for PinnedByteBlock {}
unsafe impl Sync for PinnedByteBlock {}

impl PinnedByteBlock {
    pub(crate) fn new(block: ByteBlockPtr, ptr: NonNull<u8>, len: usize) -> Self {
        Self { block, ptr, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see the Send/Sync note; the block is pinned.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// The handle this pin holds
    pub fn byte_block(&self) -> &ByteBlockPtr {
        &self.block
    }

    /// True when this is the only handle and the only pin on the block
    pub fn is_exclusive(&self) -> bool {
        self.block.handle_count() == 1 && self.block.pin_count() == 1
    }

    /// Mutable view of the bytes, available only while exclusive
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_exclusive() {
            // SAFETY: no other handle or pin exists, and `&mut self` rules
            // out shared borrows through this one.
            Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
        } else {
            None
        }
    }
}

impl Clone for PinnedByteBlock {
    fn clone(&self) -> Self {
        // already pinned, so no residency change can race this
        self.block.add_pin();
        Self {
            block: self.block.clone(),
            ptr: self.ptr,
            len: self.len,
        }
    }
}

impl Drop for PinnedByteBlock {
    fn drop(&mut self) {
        self.block.release_pin();
    }
}

impl AsRef<[u8]> for PinnedByteBlock {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for PinnedByteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedByteBlock")
            .field("id", &self.block.id())
            .field("len", &self.len)
            .finish()
    }
}
