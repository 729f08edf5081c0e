//! FIFO storage for in-flight operations

use std::collections::VecDeque;

use blockwire_core::ConnectionId;

use super::{AsyncOp, ReadBlockOp, ReadBufferOp, WriteBlockOp, WriteBufferOp};
use crate::error::TransferOp;

/// Address of an operation: its kind plus a sequence number that stays
/// valid until the record is reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OpKey {
    pub(crate) kind: TransferOp,
    pub(crate) seq: u64,
}

/// Operations of one kind in issue order.
///
/// Only the completed prefix is reclaimed, so a record finished behind a
/// slower one stays (empty) until the slower one is done.
pub(crate) struct OpQueue<T> {
    ops: VecDeque<T>,
    /// Sequence number of `ops[0]`
    head: u64,
}

impl<T: AsyncOp> OpQueue<T> {
    fn new() -> Self {
        Self {
            ops: VecDeque::new(),
            head: 0,
        }
    }

    fn push(&mut self, op: T) -> u64 {
        let seq = self.head + self.ops.len() as u64;
        self.ops.push_back(op);
        seq
    }

    fn get_mut(&mut self, seq: u64) -> Option<&mut T> {
        let idx = seq.checked_sub(self.head)?;
        self.ops.get_mut(usize::try_from(idx).ok()?)
    }

    /// Drop the done prefix, returning how many records went
    fn reclaim(&mut self) -> usize {
        let mut n = 0;
        while self.ops.front().is_some_and(|op| op.is_done()) {
            self.ops.pop_front();
            self.head += 1;
            n += 1;
        }
        n
    }

    fn pending(&self) -> usize {
        self.ops.iter().filter(|op| !op.is_done()).count()
    }

    fn abandon_for(&mut self, id: ConnectionId) -> usize {
        let mut n = 0;
        for op in self.ops.iter_mut() {
            if !op.is_done() && op.connection().id() == id {
                op.abandon();
                n += 1;
            }
        }
        n
    }
}

/// The four operation queues of a dispatcher
pub(crate) struct OpQueues {
    read: OpQueue<ReadBufferOp>,
    read_block: OpQueue<ReadBlockOp>,
    write: OpQueue<WriteBufferOp>,
    write_block: OpQueue<WriteBlockOp>,
}

impl OpQueues {
    pub(crate) fn new() -> Self {
        Self {
            read: OpQueue::new(),
            read_block: OpQueue::new(),
            write: OpQueue::new(),
            write_block: OpQueue::new(),
        }
    }

    pub(crate) fn push_read(&mut self, op: ReadBufferOp) -> OpKey {
        OpKey {
            kind: TransferOp::ReadBuffer,
            seq: self.read.push(op),
        }
    }

    pub(crate) fn push_read_block(&mut self, op: ReadBlockOp) -> OpKey {
        OpKey {
            kind: TransferOp::ReadBlock,
            seq: self.read_block.push(op),
        }
    }

    pub(crate) fn push_write(&mut self, op: WriteBufferOp) -> OpKey {
        OpKey {
            kind: TransferOp::WriteBuffer,
            seq: self.write.push(op),
        }
    }

    pub(crate) fn push_write_block(&mut self, op: WriteBlockOp) -> OpKey {
        OpKey {
            kind: TransferOp::WriteBlock,
            seq: self.write_block.push(op),
        }
    }

    pub(crate) fn get_mut(&mut self, key: OpKey) -> Option<&mut dyn AsyncOp> {
        match key.kind {
            TransferOp::ReadBuffer => self.read.get_mut(key.seq).map(|op| op as &mut dyn AsyncOp),
            TransferOp::ReadBlock => self
                .read_block
                .get_mut(key.seq)
                .map(|op| op as &mut dyn AsyncOp),
            TransferOp::WriteBuffer => self.write.get_mut(key.seq).map(|op| op as &mut dyn AsyncOp),
            TransferOp::WriteBlock => self
                .write_block
                .get_mut(key.seq)
                .map(|op| op as &mut dyn AsyncOp),
        }
    }

    /// Abandon a single operation (payload dropped, callback not fired)
    pub(crate) fn abandon(&mut self, key: OpKey) {
        if let Some(op) = self.get_mut(key) {
            op.abandon();
        }
    }

    /// Abandon every unfinished operation on `id`
    pub(crate) fn abandon_for(&mut self, id: ConnectionId) -> usize {
        self.read.abandon_for(id)
            + self.read_block.abandon_for(id)
            + self.write.abandon_for(id)
            + self.write_block.abandon_for(id)
    }

    pub(crate) fn reclaim(&mut self) -> usize {
        self.read.reclaim()
            + self.read_block.reclaim()
            + self.write.reclaim()
            + self.write_block.reclaim()
    }

    /// Unfinished write operations of either kind
    pub(crate) fn pending_writes(&self) -> usize {
        self.write.pending() + self.write_block.pending()
    }

    /// Unfinished operations of all kinds
    pub(crate) fn pending(&self) -> usize {
        self.read.pending() + self.read_block.pending() + self.pending_writes()
    }

    /// Records held, finished or not
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.read.ops.len() + self.read_block.ops.len() + self.write.ops.len() + self.write_block.ops.len()
    }
}
