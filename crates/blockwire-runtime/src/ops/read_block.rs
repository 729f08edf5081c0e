//! Read into a pinned byte block

use std::io;

use blockwire_core::{ConnectionRef, PinnedByteBlock};

use super::{classify_recv, AsyncOp, AsyncReadBlockCallback, Completion, Transfer};

pub(crate) struct ReadBlockOp {
    conn: ConnectionRef,
    block: Option<PinnedByteBlock>,
    size: usize,
    filled: usize,
    callback: Option<AsyncReadBlockCallback>,
}

impl ReadBlockOp {
    /// `block` must be exclusive and at least `size` bytes long
    pub(crate) fn new(
        conn: ConnectionRef,
        size: usize,
        block: PinnedByteBlock,
        callback: AsyncReadBlockCallback,
    ) -> Self {
        debug_assert!(size <= block.len());
        Self {
            conn,
            block: Some(block),
            size,
            filled: 0,
            callback: Some(callback),
        }
    }
}

impl AsyncOp for ReadBlockOp {
    fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    fn attempt(&mut self) -> io::Result<Transfer> {
        let bytes = self
            .block
            .as_mut()
            .and_then(PinnedByteBlock::get_mut)
            .ok_or_else(|| io::Error::other("target block is no longer exclusive"))?;
        let result = self.conn.recv_one(&mut bytes[self.filled..self.size]);
        classify_recv(result, &mut self.filled, self.size)
    }

    fn finish(&mut self) -> Option<Completion> {
        let callback = self.callback.take()?;
        let block = self.block.take()?;
        Some(Completion::ReadBlock {
            conn: self.conn.clone(),
            block,
            filled: self.filled,
            callback,
        })
    }

    fn abandon(&mut self) {
        self.callback = None;
        self.block = None;
    }
}
