//! Connections: the capability set the dispatcher drives.
//!
//! A connection is a bidirectional byte channel with a stable identity.
//! The dispatcher never owns the transport; it holds a shared reference
//! (`ConnectionRef`) for as long as a handler or queued transfer needs it.
//!
//! Transports report readiness in one of two ways (`ReadinessSource`):
//! an OS descriptor the poll/epoll backends can watch, or a probe the
//! mock backend calls directly.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for connection identities
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a connection for its whole lifetime.
///
/// Registration, cancellation and readiness events are all keyed by this
/// value, never by the descriptor number, which the OS may reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh, never reused identity
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Direction of interest for readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// How a backend learns that a connection is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessSource {
    /// An OS descriptor usable with poll(2)/epoll(7)
    Fd(RawFd),
    /// Readiness is queried through `Connection::probe`
    Probe,
}

/// A byte channel the dispatcher can transfer data over.
///
/// `recv_one` and `send_one` perform a single non-blocking attempt. They
/// must return `io::ErrorKind::WouldBlock` when no progress is possible
/// right now, and `Ok(0)` from `recv_one` means orderly end of stream.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Human-readable description used in error messages
    fn label(&self) -> String {
        self.id().to_string()
    }

    /// False once the connection has been closed locally
    fn is_valid(&self) -> bool;

    fn source(&self) -> ReadinessSource;

    /// Non-blocking readiness check, used for `ReadinessSource::Probe`.
    fn probe(&self, _direction: Direction) -> bool {
        true
    }

    /// One receive attempt into `buf`
    fn recv_one(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// One send attempt from `buf`
    fn send_one(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Shared handle to a connection
pub type ConnectionRef = Arc<dyn Connection>;

/// What a failed transfer attempt means for the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again on the next readiness notification
    Transient,
    /// Peer went away; the operation completes with what it has
    GracefulEnd,
    /// Unrecoverable; surface to the caller
    Fatal,
}

impl ErrorClass {
    pub fn of(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ErrorClass::Transient,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => ErrorClass::GracefulEnd,
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
        assert_eq!(format!("{a}"), format!("conn#{}", a.raw()));
    }

    #[test]
    fn test_error_classification() {
        let cases = [
            (io::ErrorKind::WouldBlock, ErrorClass::Transient),
            (io::ErrorKind::Interrupted, ErrorClass::Transient),
            (io::ErrorKind::BrokenPipe, ErrorClass::GracefulEnd),
            (io::ErrorKind::ConnectionReset, ErrorClass::GracefulEnd),
            (io::ErrorKind::PermissionDenied, ErrorClass::Fatal),
            (io::ErrorKind::InvalidInput, ErrorClass::Fatal),
        ];
        for (kind, class) in cases {
            assert_eq!(ErrorClass::of(&io::Error::from(kind)), class, "{kind:?}");
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_os_errors_classify_by_errno() {
        let eagain = io::Error::from_raw_os_error(11);
        assert_eq!(ErrorClass::of(&eagain), ErrorClass::Transient);
        let epipe = io::Error::from_raw_os_error(32);
        assert_eq!(ErrorClass::of(&epipe), ErrorClass::GracefulEnd);
        let ebadf = io::Error::from_raw_os_error(9);
        assert_eq!(ErrorClass::of(&ebadf), ErrorClass::Fatal);
    }
}
