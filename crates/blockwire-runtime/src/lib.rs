//! # blockwire-runtime
//!
//! The blockwire event loop and everything it drives.
//!
//! This crate provides:
//! - `Dispatcher`: single-threaded, callback-driven loop multiplexing
//!   timers, readiness handlers and partial async transfers
//! - Readiness backends: poll(2), epoll(7) on Linux, and an in-process
//!   mock used for deterministic tests
//! - `DispatcherThread`: a dispatcher on its own named thread, fed by
//!   jobs from other threads
//! - Transports: non-blocking TCP and mock connection pairs
//! - Environment-driven configuration and `tracing` setup

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod logging;
pub mod net;
pub mod ops;
pub mod thread;
pub mod timer;
mod waker;

// Re-exports
pub use backend::Readiness;
pub use config::{BackendKind, DispatcherConfig, FatalPolicy};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use error::{Error, Result, TransferOp};
pub use handle::{DispatcherHandle, DispatcherState};
pub use net::mock::{MockConfig, MockConnection, MockHub};
pub use net::tcp::TcpConnection;
pub use ops::{
    AsyncCallback, AsyncReadBlockCallback, AsyncReadCallback, AsyncWriteCallback, Job,
    TimerCallback, Transfer,
};
pub use thread::DispatcherThread;
pub use timer::{TimerHandle, TimerStats};
