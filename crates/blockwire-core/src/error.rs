//! Error types for the block pool and transfer requests

use std::io;

use thiserror::Error;

use crate::block::BlockId;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the block pool and request validation
#[derive(Debug, Error)]
pub enum Error {
    /// Every arena slot holds a live block
    #[error("block pool exhausted ({max_blocks} blocks)")]
    PoolExhausted { max_blocks: usize },

    /// Creating, growing or writing the swap file failed
    #[error("swap {op} failed: {source}")]
    Swap {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Loading an evicted block back into memory failed
    #[error("reload of block {block} failed (errno {}): {source}", .source.raw_os_error().unwrap_or(0))]
    Reload {
        block: BlockId,
        #[source]
        source: io::Error,
    },

    /// A transfer asked for more bytes than its target holds
    #[error("request of {requested} bytes exceeds capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },

    /// In-place writes need the only handle on a block
    #[error("block {0} is shared and cannot be written in place")]
    BlockShared(BlockId),

    /// The connection was closed or invalidated
    #[error("connection {0} is not valid")]
    InvalidConnection(String),
}

impl Error {
    /// Underlying OS error code, if this error wraps one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Swap { source, .. } | Error::Reload { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
