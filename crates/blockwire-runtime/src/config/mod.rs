//! Dispatcher configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use blockwire_runtime::config::{BackendKind, DispatcherConfig};
//!
//! // Defaults with env overrides
//! let config = DispatcherConfig::from_env();
//!
//! // Or customize programmatically
//! let config = DispatcherConfig::new()
//!     .backend(BackendKind::Poll)
//!     .idle_wait(Duration::from_millis(50));
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use blockwire_core::env::{env_get, env_get_millis, env_get_opt};
use tracing::warn;

/// Readiness detection mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Portable poll(2)
    Poll,
    /// Linux epoll(7)
    Epoll,
    /// In-process readiness for mock connections
    Mock,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "select" => Ok(BackendKind::Poll),
            "epoll" => Ok(BackendKind::Epoll),
            "mock" => Ok(BackendKind::Mock),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Poll => "poll",
            BackendKind::Epoll => "epoll",
            BackendKind::Mock => "mock",
        })
    }
}

/// What the dispatcher does with a fatal transfer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Return the error from `dispatch()` / `run_loop()`
    Abort,
    /// Log the error and continue the cycle
    Report,
}

impl FromStr for FatalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FatalPolicy::Abort),
            "report" => Ok(FatalPolicy::Report),
            other => Err(format!("unknown fatal policy {other:?}")),
        }
    }
}

/// Read `key` as a `T`, warning about and ignoring unparsable values
fn env_parse_or<T: FromStr<Err = String>>(key: &str, default: T) -> T {
    match env_get_opt::<String>(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(key, error = %e, "ignoring invalid setting");
            default
        }),
    }
}

/// Dispatcher configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub backend: BackendKind,
    /// Backend wait when no timer is scheduled
    pub idle_wait: Duration,
    /// Minimum backend wait while a timer is pending
    pub min_wait: Duration,
    /// Events per epoll_wait call
    pub max_events: usize,
    pub fatal_policy: FatalPolicy,
    /// Initial timer heap capacity
    pub timer_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DispatcherConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `BLOCKWIRE_BACKEND` - poll, epoll or mock
    /// - `BLOCKWIRE_IDLE_WAIT_MS` - Idle wait in milliseconds
    /// - `BLOCKWIRE_MIN_WAIT_MS` - Minimum timed wait in milliseconds
    /// - `BLOCKWIRE_MAX_EVENTS` - Events per epoll_wait
    /// - `BLOCKWIRE_FATAL_POLICY` - abort or report
    pub fn from_env() -> Self {
        Self {
            backend: env_parse_or("BLOCKWIRE_BACKEND", defaults::BACKEND),
            idle_wait: env_get_millis("BLOCKWIRE_IDLE_WAIT_MS", defaults::IDLE_WAIT_MS),
            min_wait: env_get_millis("BLOCKWIRE_MIN_WAIT_MS", defaults::MIN_WAIT_MS),
            max_events: env_get("BLOCKWIRE_MAX_EVENTS", defaults::MAX_EVENTS).max(1),
            fatal_policy: env_parse_or("BLOCKWIRE_FATAL_POLICY", defaults::FATAL_POLICY),
            timer_capacity: defaults::TIMER_CAPACITY,
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            backend: defaults::BACKEND,
            idle_wait: Duration::from_millis(defaults::IDLE_WAIT_MS),
            min_wait: Duration::from_millis(defaults::MIN_WAIT_MS),
            max_events: defaults::MAX_EVENTS,
            fatal_policy: defaults::FATAL_POLICY,
            timer_capacity: defaults::TIMER_CAPACITY,
        }
    }

    /// Defaults with the in-process mock backend
    pub fn mock() -> Self {
        Self::new().backend(BackendKind::Mock)
    }

    // Builder methods

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn idle_wait(mut self, d: Duration) -> Self {
        self.idle_wait = d;
        self
    }

    pub fn min_wait(mut self, d: Duration) -> Self {
        self.min_wait = d;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    pub fn timer_capacity(mut self, n: usize) -> Self {
        self.timer_capacity = n;
        self
    }
}
