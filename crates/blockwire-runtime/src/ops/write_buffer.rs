//! Write from an owned buffer

use std::io;

use blockwire_core::{Buffer, ConnectionRef};

use super::{classify_send, AsyncOp, AsyncWriteCallback, Completion, Transfer};

pub(crate) struct WriteBufferOp {
    conn: ConnectionRef,
    buffer: Option<Buffer>,
    written: usize,
    callback: Option<AsyncWriteCallback>,
}

impl WriteBufferOp {
    pub(crate) fn new(conn: ConnectionRef, buffer: Buffer, callback: AsyncWriteCallback) -> Self {
        Self {
            conn,
            buffer: Some(buffer),
            written: 0,
            callback: Some(callback),
        }
    }
}

impl AsyncOp for WriteBufferOp {
    fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    fn attempt(&mut self) -> io::Result<Transfer> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(Transfer::Eof);
        };
        let result = self.conn.send_one(&buffer[self.written..]);
        classify_send(result, &mut self.written, buffer.len())
    }

    fn finish(&mut self) -> Option<Completion> {
        let callback = self.callback.take()?;
        self.buffer = None;
        Some(Completion::Write {
            conn: self.conn.clone(),
            callback,
        })
    }

    fn abandon(&mut self) {
        self.callback = None;
        self.buffer = None;
    }
}
