//! Library default configuration values
//!
//! Every value here may be overridden at runtime through the matching
//! `BLOCKWIRE_*` environment variable.

use super::{BackendKind, FatalPolicy};

/// Readiness backend
#[cfg(target_os = "linux")]
pub const BACKEND: BackendKind = BackendKind::Epoll;

#[cfg(not(target_os = "linux"))]
pub const BACKEND: BackendKind = BackendKind::Poll;

/// Backend wait when no timer is scheduled
pub const IDLE_WAIT_MS: u64 = 10_000;

/// Lower bound on the backend wait when a timer is pending
pub const MIN_WAIT_MS: u64 = 1;

/// Readiness events collected per backend wait (epoll)
pub const MAX_EVENTS: usize = 64;

/// What a fatal transfer error does to the loop
pub const FATAL_POLICY: FatalPolicy = FatalPolicy::Abort;

/// Initial capacity of the timer heap
pub const TIMER_CAPACITY: usize = 64;
