//! # blockwire
//!
//! Callback-driven I/O dispatching for block-oriented data movement.
//!
//! A single-threaded [`Dispatcher`] multiplexes timers, readiness handlers
//! and asynchronous transfers over non-blocking connections. Transfers
//! progress in partial steps and call back exactly once when done. Block
//! transfers move bytes straight into and out of pinned byte blocks from a
//! [`BlockPool`], whose unpinned blocks may be spilled to a swap file and
//! reloaded on the next pin.
//!
//! ## Features
//!
//! - **Timers**: periodic, drift-free, cancellable from inside callbacks
//! - **Async transfers**: read/write owned buffers or pinned block views
//! - **Readiness backends**: poll(2), epoll(7), and an in-process mock
//! - **Cross-thread control**: terminate, interrupt and job injection via
//!   [`DispatcherHandle`]
//! - **Spillable blocks**: pins keep bytes resident for the life of a transfer
//!
//! ## Quick Start
//!
//! ```ignore
//! use blockwire::prelude::*;
//!
//! fn main() -> blockwire::Result<()> {
//!     blockwire::init_logging();
//!
//!     let mut d = Dispatcher::new(DispatcherConfig::from_env())?;
//!     let (a, b) = TcpConnection::pair()?;
//!     let (a, b): (ConnectionRef, ConnectionRef) = (a, b);
//!
//!     d.async_read(&b, 5, |d, _, buf| {
//!         println!("got {:?}", buf.as_slice());
//!         d.terminate();
//!     })?;
//!     d.async_write_copy(&a, b"hello", |_, _| {})?;
//!
//!     d.run_loop()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    other threads                             │
//! │   DispatcherHandle: terminate / interrupt / run / add_timer  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ command queue + waker
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Dispatcher                              │
//! │  ┌────────────┐   ┌──────────────────┐   ┌────────────────┐  │
//! │  │ TimerQueue │   │ Registry         │   │ OpQueues       │  │
//! │  │ (deadline  │   │ conn -> handler  │   │ FIFO per conn  │  │
//! │  │  heap)     │   │ per direction    │   │ and direction  │  │
//! │  └────────────┘   └────────┬─────────┘   └───────┬────────┘  │
//! │                            │ watch/unwatch       │ recv/send │
//! │                   ┌────────▼─────────┐           │           │
//! │                   │ Backend          │           │           │
//! │                   │ poll|epoll|mock  │           │           │
//! │                   └──────────────────┘           │           │
//! └──────────────────────────────────────────────────┼───────────┘
//!                                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  BlockPool: ByteBlockPtr ──pin──► PinnedByteBlock            │
//! │             unpinned blocks ──evict──► swap file ──reload──┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use blockwire_core::{
    Block, BlockId, BlockPool, Buffer, ByteBlockPtr, Connection, ConnectionId, ConnectionRef,
    Direction, ErrorClass, PinnedBlock, PinnedByteBlock, PoolConfig, PoolStats, ReadinessSource,
    Residency,
};

// Re-export the core error under its own name; runtime errors wrap it
pub use blockwire_core::Error as CoreError;

// Re-export runtime types
pub use blockwire_runtime::{
    BackendKind, Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherState,
    DispatcherStats, DispatcherThread, Error, FatalPolicy, MockConfig, MockConnection, MockHub,
    Result, TcpConnection, TimerHandle, TimerStats, TransferOp,
};

pub use blockwire_runtime::logging::init as init_logging;

/// Everything needed to drive a dispatcher
pub mod prelude {
    pub use crate::{
        Block, BlockPool, Buffer, Connection, ConnectionRef, Dispatcher, DispatcherConfig,
        DispatcherHandle, DispatcherThread, PinnedBlock, PinnedByteBlock, PoolConfig,
        TcpConnection, TimerHandle,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[test]
    fn test_spilled_block_relayed_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BlockPool::new(PoolConfig::new().swap_dir(dir.path())).unwrap();
        let src = pool.from_slice(b"spilled bytes").unwrap();
        assert!(src.evict().unwrap());
        assert_eq!(src.residency(), Residency::OnDisk);

        let mut d = Dispatcher::new(DispatcherConfig::mock()).unwrap();
        let hub = d.mock_hub().unwrap();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new().chunk_limit(4));
        let (a, b): (ConnectionRef, ConnectionRef) = (a, b);

        let sink = pool.allocate(16).unwrap().pin().unwrap();
        let got = Arc::new(Mutex::new(None));
        let out = Arc::clone(&got);
        d.async_read_block(&b, 13, sink, move |_, _, block, n| {
            *out.lock().unwrap() = Some(block.as_slice()[..n].to_vec());
        })
        .unwrap();
        d.async_write_block(&a, Block::whole(src.clone(), 1).pin().unwrap(), |_, _| {})
            .unwrap();

        let start = Instant::now();
        while got.lock().unwrap().is_none() {
            assert!(start.elapsed() < Duration::from_secs(5));
            d.dispatch().unwrap();
        }
        assert_eq!(got.lock().unwrap().as_deref(), Some(&b"spilled bytes"[..]));
        assert_eq!(src.pin_count(), 0);
    }
}
