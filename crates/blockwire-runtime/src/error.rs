//! Error types for the dispatcher and its backends

use std::fmt;
use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which async transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOp {
    ReadBuffer,
    ReadBlock,
    WriteBuffer,
    WriteBlock,
}

impl TransferOp {
    pub fn is_write(self) -> bool {
        matches!(self, TransferOp::WriteBuffer | TransferOp::WriteBlock)
    }
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferOp::ReadBuffer => "async read",
            TransferOp::ReadBlock => "async block read",
            TransferOp::WriteBuffer => "async write",
            TransferOp::WriteBlock => "async block write",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the dispatcher
#[derive(Debug, Error)]
pub enum Error {
    /// Block pool or request validation failure
    #[error(transparent)]
    Core(#[from] blockwire_core::Error),

    /// Unrecoverable I/O error on a connection
    #[error("{op} on {connection} failed (errno {}): {source}", .source.raw_os_error().unwrap_or(0))]
    Transfer {
        connection: String,
        op: TransferOp,
        #[source]
        source: io::Error,
    },

    /// A readiness backend system call failed
    #[error("backend {op} failed: {errno}")]
    Backend { op: &'static str, errno: Errno },

    /// The connection's readiness source does not fit the backend
    #[error("connection {connection} cannot be watched by the {backend} backend")]
    UnsupportedSource {
        connection: String,
        backend: &'static str,
    },

    /// The dispatcher thread could not be started
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] io::Error),

    /// The dispatcher thread panicked
    #[error("dispatcher thread panicked")]
    ThreadPanicked,
}

impl Error {
    /// Capture `errno` after a failed libc call
    pub(crate) fn last_os(op: &'static str) -> Self {
        Error::Backend {
            op,
            errno: Errno::last(),
        }
    }

    /// OS error code carried by this error, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Core(e) => e.raw_os_error(),
            Error::Transfer { source, .. } | Error::Spawn(source) => source.raw_os_error(),
            Error::Backend { errno, .. } => Some(*errno as i32),
            _ => None,
        }
    }

    /// True for failures of a transfer on a connection
    pub fn is_transfer(&self) -> bool {
        matches!(self, Error::Transfer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_names_connection_and_errno() {
        let err = Error::Transfer {
            connection: "tcp:10.0.0.1:4000".into(),
            op: TransferOp::WriteBlock,
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        let msg = err.to_string();
        assert!(msg.contains("async block write"));
        assert!(msg.contains("tcp:10.0.0.1:4000"));
        assert!(msg.contains(&format!("errno {}", libc::EBADF)));
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(err.is_transfer());
    }

    #[test]
    fn test_backend_error() {
        let err = Error::Backend {
            op: "epoll_ctl",
            errno: Errno::ENOENT,
        };
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(err.to_string().starts_with("backend epoll_ctl failed"));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: Error = blockwire_core::Error::InvalidConnection("mock:3".into()).into();
        assert_eq!(err.to_string(), "connection mock:3 is not valid");
    }
}
