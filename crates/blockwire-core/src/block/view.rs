//! Block views: a byte range of a byte block plus item metadata.

use std::fmt;

use super::pin::PinnedByteBlock;
use super::pool::ByteBlockPtr;
use crate::error::Result;

/// Logical view into a byte block.
///
/// `first_item` is the offset of the first record that starts inside
/// `begin..end`; `num_items` counts the records starting in the view.
/// The view holds a handle but no pin, so the bytes may be on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    byte_block: ByteBlockPtr,
    begin: usize,
    end: usize,
    first_item: usize,
    num_items: usize,
}

impl Block {
    pub fn new(
        byte_block: ByteBlockPtr,
        begin: usize,
        end: usize,
        first_item: usize,
        num_items: usize,
    ) -> Self {
        debug_assert!(begin <= end && end <= byte_block.size());
        debug_assert!(begin <= first_item && first_item <= end);
        Self {
            byte_block,
            begin,
            end,
            first_item,
            num_items,
        }
    }

    /// View covering the whole byte block
    pub fn whole(byte_block: ByteBlockPtr, num_items: usize) -> Self {
        let end = byte_block.size();
        Self::new(byte_block, 0, end, 0, num_items)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn begin(&self) -> usize {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn first_item(&self) -> usize {
        self.first_item
    }

    #[inline]
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn byte_block(&self) -> &ByteBlockPtr {
        &self.byte_block
    }

    /// Pin the underlying byte block, loading it from swap if needed
    pub fn pin(&self) -> Result<PinnedBlock> {
        let pin = self.byte_block.pin()?;
        Ok(PinnedBlock {
            pin,
            begin: self.begin,
            end: self.end,
            first_item: self.first_item,
            num_items: self.num_items,
        })
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("byte_block", &self.byte_block.id())
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("first_item", &self.first_item)
            .field("num_items", &self.num_items)
            .finish()
    }
}

/// A block view whose byte block is pinned for the lifetime of the value.
#[derive(Clone)]
pub struct PinnedBlock {
    pin: PinnedByteBlock,
    begin: usize,
    end: usize,
    first_item: usize,
    num_items: usize,
}

impl PinnedBlock {
    /// Wrap a pinned byte block with a view of `begin..end`
    pub fn from_pinned(
        pin: PinnedByteBlock,
        begin: usize,
        end: usize,
        first_item: usize,
        num_items: usize,
    ) -> Self {
        debug_assert!(begin <= end && end <= pin.len());
        Self {
            pin,
            begin,
            end,
            first_item,
            num_items,
        }
    }

    /// The viewed bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.pin.as_slice()[self.begin..self.end]
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn first_item(&self) -> usize {
        self.first_item
    }

    #[inline]
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn pinned_byte_block(&self) -> &PinnedByteBlock {
        &self.pin
    }

    /// Drop the pin, keeping an unpinned view
    pub fn to_block(&self) -> Block {
        Block {
            byte_block: self.pin.byte_block().clone(),
            begin: self.begin,
            end: self.end,
            first_item: self.first_item,
            num_items: self.num_items,
        }
    }
}

impl fmt::Debug for PinnedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBlock")
            .field("byte_block", &self.pin.byte_block().id())
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("num_items", &self.num_items)
            .finish()
    }
}
