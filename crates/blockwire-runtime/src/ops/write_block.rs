//! Write from a pinned block view

use std::io;

use blockwire_core::{ConnectionRef, PinnedBlock};

use super::{classify_send, AsyncOp, AsyncWriteCallback, Completion, Transfer};

pub(crate) struct WriteBlockOp {
    conn: ConnectionRef,
    block: Option<PinnedBlock>,
    written: usize,
    callback: Option<AsyncWriteCallback>,
}

impl WriteBlockOp {
    pub(crate) fn new(conn: ConnectionRef, block: PinnedBlock, callback: AsyncWriteCallback) -> Self {
        Self {
            conn,
            block: Some(block),
            written: 0,
            callback: Some(callback),
        }
    }
}

impl AsyncOp for WriteBlockOp {
    fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    fn attempt(&mut self) -> io::Result<Transfer> {
        let Some(block) = self.block.as_ref() else {
            return Ok(Transfer::Eof);
        };
        let data = block.data();
        let result = self.conn.send_one(&data[self.written..]);
        classify_send(result, &mut self.written, data.len())
    }

    fn finish(&mut self) -> Option<Completion> {
        let callback = self.callback.take()?;
        // release the pin before the callback runs
        self.block = None;
        Some(Completion::Write {
            conn: self.conn.clone(),
            callback,
        })
    }

    fn abandon(&mut self) {
        self.callback = None;
        self.block = None;
    }
}
