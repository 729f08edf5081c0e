//! # blockwire-core
//!
//! Core types for the blockwire data-movement layer.
//!
//! This crate holds everything that is independent of how readiness is
//! detected: the `Connection` capability set, owned `Buffer`s, and the
//! block pool whose byte blocks can be pinned in memory or spilled to a
//! swap file. The event loop itself lives in `blockwire-runtime`.
//!
//! ## Modules
//!
//! - `connection` - Connection trait, identities, error classification
//! - `buffer` - Fixed-size owned byte buffers
//! - `block` - Block pool, pins, block views, swap file
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod block;
pub mod buffer;
pub mod connection;
pub mod env;
pub mod error;

// Re-exports for convenience
pub use block::{
    Block, BlockId, BlockPool, ByteBlockPtr, PinnedBlock, PinnedByteBlock, PoolConfig, PoolStats,
    Residency,
};
pub use buffer::Buffer;
pub use connection::{
    Connection, ConnectionId, ConnectionRef, Direction, ErrorClass, ReadinessSource,
};
pub use env::{env_get, env_get_millis, env_get_opt};
pub use error::{Error, Result};
