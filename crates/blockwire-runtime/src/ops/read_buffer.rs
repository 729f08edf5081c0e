//! Read into an owned buffer

use std::io;
use std::mem;

use blockwire_core::{Buffer, ConnectionRef};

use super::{classify_recv, AsyncOp, AsyncReadCallback, Completion, Transfer};

pub(crate) struct ReadBufferOp {
    conn: ConnectionRef,
    buffer: Buffer,
    filled: usize,
    callback: Option<AsyncReadCallback>,
}

impl ReadBufferOp {
    pub(crate) fn new(conn: ConnectionRef, size: usize, callback: AsyncReadCallback) -> Self {
        Self {
            conn,
            buffer: Buffer::new(size),
            filled: 0,
            callback: Some(callback),
        }
    }
}

impl AsyncOp for ReadBufferOp {
    fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    fn attempt(&mut self) -> io::Result<Transfer> {
        let target = self.buffer.len();
        let result = self.conn.recv_one(&mut self.buffer[self.filled..]);
        classify_recv(result, &mut self.filled, target)
    }

    fn finish(&mut self) -> Option<Completion> {
        let callback = self.callback.take()?;
        let buffer = mem::take(&mut self.buffer).truncated(self.filled);
        Some(Completion::Read {
            conn: self.conn.clone(),
            buffer,
            callback,
        })
    }

    fn abandon(&mut self) {
        self.callback = None;
        self.buffer = Buffer::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::{MockConfig, MockConnection, MockHub};
    use blockwire_core::Connection;

    #[test]
    fn test_short_chunks_then_complete() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new().recv_chunk(2));
        assert_eq!(a.send_one(b"hello").unwrap(), 5);

        let conn: ConnectionRef = b;
        let mut op = ReadBufferOp::new(conn, 5, Box::new(|_, _, _| {}));
        assert_eq!(op.attempt().unwrap(), Transfer::Partial(2));
        assert_eq!(op.attempt().unwrap(), Transfer::Partial(2));
        assert_eq!(op.attempt().unwrap(), Transfer::Complete(1));
        assert!(!op.is_done());

        match op.finish() {
            Some(Completion::Read { buffer, .. }) => assert_eq!(buffer.as_slice(), b"hello"),
            _ => panic!("expected read completion"),
        }
        assert!(op.is_done());
        assert!(op.finish().is_none());
    }

    #[test]
    fn test_would_block_is_retry() {
        let hub = MockHub::new();
        let (_a, b) = MockConnection::pair(&hub, MockConfig::new());
        let mut op = ReadBufferOp::new(b, 4, Box::new(|_, _, _| {}));
        assert_eq!(op.attempt().unwrap(), Transfer::Retry);
    }

    #[test]
    fn test_eof_yields_short_buffer() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        a.send_one(b"ab").unwrap();
        a.close();

        let mut op = ReadBufferOp::new(b, 8, Box::new(|_, _, _| {}));
        assert_eq!(op.attempt().unwrap(), Transfer::Partial(2));
        assert_eq!(op.attempt().unwrap(), Transfer::Eof);
        match op.finish() {
            Some(Completion::Read { buffer, .. }) => assert_eq!(buffer.as_slice(), b"ab"),
            _ => panic!("expected read completion"),
        }
    }

    #[test]
    fn test_abandon_drops_callback() {
        let hub = MockHub::new();
        let (_a, b) = MockConnection::pair(&hub, MockConfig::new());
        let mut op = ReadBufferOp::new(b, 4, Box::new(|_, _, _| panic!("must not fire")));
        op.abandon();
        assert!(op.is_done());
        assert!(op.finish().is_none());
    }
}
