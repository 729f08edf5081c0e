//! Async transfer operations.
//!
//! Each operation is a resumable state machine for one partial transfer.
//! The dispatcher calls `attempt` once per readiness notification; the
//! operation performs a single non-blocking send or receive and reports a
//! [`Transfer`] outcome. When the target size is reached, or the peer ends
//! the stream, `finish` hands back the payload and callback exactly once.
//!
//! Records stay in a per-kind FIFO (`OpQueue`) until every earlier
//! record of the same kind has completed too. Payloads leave the record
//! at completion, so a record waiting for reclamation holds no buffer
//! and no pin.

mod queue;
mod read_block;
mod read_buffer;
mod write_block;
mod write_buffer;

use std::io;

use blockwire_core::{Buffer, ConnectionRef, ErrorClass, PinnedByteBlock};

use crate::dispatcher::Dispatcher;

pub(crate) use queue::{OpKey, OpQueues};
pub(crate) use read_block::ReadBlockOp;
pub(crate) use read_buffer::ReadBufferOp;
pub(crate) use write_block::WriteBlockOp;
pub(crate) use write_buffer::WriteBufferOp;

/// Timer callback; return `true` to fire again one interval later
pub type TimerCallback = Box<dyn FnMut(&mut Dispatcher) -> bool + Send>;

/// Readiness callback; return `true` to stay registered
pub type AsyncCallback = Box<dyn FnMut(&mut Dispatcher) -> bool + Send>;

/// Receives the filled buffer, shorter than requested on end of stream
pub type AsyncReadCallback = Box<dyn FnOnce(&mut Dispatcher, &ConnectionRef, Buffer) + Send>;

/// Receives the pinned block and the number of bytes written into it
pub type AsyncReadBlockCallback =
    Box<dyn FnOnce(&mut Dispatcher, &ConnectionRef, PinnedByteBlock, usize) + Send>;

/// Fires once a write has been fully sent, or the peer went away
pub type AsyncWriteCallback = Box<dyn FnOnce(&mut Dispatcher, &ConnectionRef) + Send>;

/// Work shipped to the dispatcher thread
pub type Job = Box<dyn FnOnce(&mut Dispatcher) + Send>;

/// Outcome of one transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Nothing moved (would block or interrupted)
    Retry,
    /// Moved this many bytes, more remain
    Partial(usize),
    /// Moved this many bytes and reached the target size
    Complete(usize),
    /// Peer ended the stream before the target size
    Eof,
}

impl Transfer {
    #[inline]
    pub fn is_final(self) -> bool {
        matches!(self, Transfer::Complete(_) | Transfer::Eof)
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Transfer::Partial(n) | Transfer::Complete(n) => n,
            Transfer::Retry | Transfer::Eof => 0,
        }
    }
}

/// Map one receive result onto a transfer outcome.
///
/// `Ok(0)` is an orderly shutdown; peer resets count as end of stream.
pub(crate) fn classify_recv(
    result: io::Result<usize>,
    done: &mut usize,
    target: usize,
) -> io::Result<Transfer> {
    classify(result, done, target, Transfer::Eof)
}

/// Map one send result onto a transfer outcome.
///
/// A closed peer completes the write early.
pub(crate) fn classify_send(
    result: io::Result<usize>,
    done: &mut usize,
    target: usize,
) -> io::Result<Transfer> {
    classify(result, done, target, Transfer::Retry)
}

fn classify(
    result: io::Result<usize>,
    done: &mut usize,
    target: usize,
    on_zero: Transfer,
) -> io::Result<Transfer> {
    match result {
        Ok(0) => Ok(on_zero),
        Ok(n) => {
            *done += n;
            if *done >= target {
                Ok(Transfer::Complete(n))
            } else {
                Ok(Transfer::Partial(n))
            }
        }
        Err(e) => match ErrorClass::of(&e) {
            ErrorClass::Transient => Ok(Transfer::Retry),
            ErrorClass::GracefulEnd => Ok(Transfer::Eof),
            ErrorClass::Fatal => Err(e),
        },
    }
}

/// A finished operation's payload and callback, ready to fire
pub(crate) enum Completion {
    Read {
        conn: ConnectionRef,
        buffer: Buffer,
        callback: AsyncReadCallback,
    },
    ReadBlock {
        conn: ConnectionRef,
        block: PinnedByteBlock,
        filled: usize,
        callback: AsyncReadBlockCallback,
    },
    Write {
        conn: ConnectionRef,
        callback: AsyncWriteCallback,
    },
}

impl Completion {
    pub(crate) fn fire(self, dispatcher: &mut Dispatcher) {
        match self {
            Completion::Read {
                conn,
                buffer,
                callback,
            } => callback(dispatcher, &conn, buffer),
            Completion::ReadBlock {
                conn,
                block,
                filled,
                callback,
            } => callback(dispatcher, &conn, block, filled),
            Completion::Write { conn, callback } => callback(dispatcher, &conn),
        }
    }
}

/// One in-flight transfer
pub(crate) trait AsyncOp {
    fn connection(&self) -> &ConnectionRef;

    /// Completed or abandoned; eligible for reclamation
    fn is_done(&self) -> bool;

    /// One non-blocking transfer attempt
    fn attempt(&mut self) -> io::Result<Transfer>;

    /// Mark done and hand back payload and callback. `None` if already done.
    fn finish(&mut self) -> Option<Completion>;

    /// Mark done, dropping payload and callback without firing
    fn abandon(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_recv() {
        let mut done = 0;
        assert_eq!(classify_recv(Ok(3), &mut done, 5).unwrap(), Transfer::Partial(3));
        assert_eq!(classify_recv(Ok(2), &mut done, 5).unwrap(), Transfer::Complete(2));
        assert_eq!(done, 5);

        let mut done = 0;
        assert_eq!(classify_recv(Ok(0), &mut done, 5).unwrap(), Transfer::Eof);
        let would_block = Err(io::ErrorKind::WouldBlock.into());
        assert_eq!(classify_recv(would_block, &mut done, 5).unwrap(), Transfer::Retry);
        let reset = Err(io::ErrorKind::ConnectionReset.into());
        assert_eq!(classify_recv(reset, &mut done, 5).unwrap(), Transfer::Eof);
        let denied = Err(io::ErrorKind::PermissionDenied.into());
        assert!(classify_recv(denied, &mut done, 5).is_err());
        assert_eq!(done, 0);
    }

    #[test]
    fn test_classify_send() {
        let mut done = 0;
        assert_eq!(classify_send(Ok(0), &mut done, 4).unwrap(), Transfer::Retry);
        assert_eq!(classify_send(Ok(4), &mut done, 4).unwrap(), Transfer::Complete(4));
        let pipe = Err(io::ErrorKind::BrokenPipe.into());
        assert_eq!(classify_send(pipe, &mut done, 4).unwrap(), Transfer::Eof);
        let interrupted = Err(io::ErrorKind::Interrupted.into());
        assert_eq!(classify_send(interrupted, &mut done, 4).unwrap(), Transfer::Retry);
    }

    #[test]
    fn test_transfer_helpers() {
        assert!(Transfer::Eof.is_final());
        assert!(Transfer::Complete(1).is_final());
        assert!(!Transfer::Partial(1).is_final());
        assert_eq!(Transfer::Partial(7).bytes(), 7);
        assert_eq!(Transfer::Retry.bytes(), 0);
    }
}
