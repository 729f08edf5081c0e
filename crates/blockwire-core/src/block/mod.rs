//! Byte blocks, pins and block views.
//!
//! A `BlockPool` owns an arena of byte blocks addressed by `BlockId`.
//! `ByteBlockPtr` is a counted handle, `PinnedByteBlock` additionally
//! keeps the bytes resident. `Block` and `PinnedBlock` are range views
//! used to ship one unit of serialized records.

mod pin;
mod pool;
mod slot;
mod swap;
mod view;

pub use pin::PinnedByteBlock;
pub use pool::{BlockPool, ByteBlockPtr, PoolConfig, PoolStats, Residency, DEFAULT_MAX_BLOCKS};
pub use slot::BlockId;
pub use view::{Block, PinnedBlock};
