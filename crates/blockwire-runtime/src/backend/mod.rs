//! Readiness backends
//!
//! A backend watches connections for read and write readiness and blocks
//! the dispatcher until something is ready, a timeout elapses, or another
//! thread interrupts the wait. The set of backends is closed:
//!
//! - `Poll` - portable poll(2) over file descriptors
//! - `Epoll` - level-triggered epoll(7), Linux only
//! - `Mock` - probes in-process connections, woken through a `MockHub`
//!
//! Each backend keeps at most one read and one write interest per
//! connection. Watching a direction twice is a no-op.

mod mock;
mod poll;

#[cfg(target_os = "linux")]
mod epoll;

use std::sync::Arc;
use std::time::Duration;

use blockwire_core::{ConnectionId, ConnectionRef, Direction, ReadinessSource};
use tracing::debug;

use crate::config::{BackendKind, DispatcherConfig};
use crate::error::{Error, Result};
use crate::net::mock::MockHub;
use crate::waker::{FdWaker, Waker};

use self::mock::MockBackend;
use self::poll::PollBackend;

#[cfg(target_os = "linux")]
use self::epoll::EpollBackend;

/// One ready direction of a watched connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Readiness {
    pub id: ConnectionId,
    pub direction: Direction,
}

/// Directions watched for one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    #[inline]
    pub(crate) fn wants(self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, direction: Direction, on: bool) {
        match direction {
            Direction::Read => self.read = on,
            Direction::Write => self.write = on,
        }
    }

    #[inline]
    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// poll(2) and epoll_wait(2) timeout: whole milliseconds, rounded up so a
/// sub-millisecond wait does not turn into a busy loop
pub(crate) fn timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

pub(crate) enum Backend {
    Poll(PollBackend),
    #[cfg(target_os = "linux")]
    Epoll(EpollBackend),
    Mock(MockBackend),
}

impl Backend {
    /// Build the configured backend and the waker that interrupts it
    pub(crate) fn new(config: &DispatcherConfig) -> Result<(Self, Waker)> {
        let backend = match config.backend {
            BackendKind::Mock => {
                let hub = MockHub::new();
                let waker = Waker::Hub(Arc::clone(&hub));
                (Backend::Mock(MockBackend::new(hub)), waker)
            }
            BackendKind::Poll => {
                let fd_waker = Arc::new(FdWaker::new()?);
                let waker = Waker::Fd(Arc::clone(&fd_waker));
                (Backend::Poll(PollBackend::new(fd_waker)), waker)
            }
            #[cfg(target_os = "linux")]
            BackendKind::Epoll => {
                let fd_waker = Arc::new(FdWaker::new()?);
                let waker = Waker::Fd(Arc::clone(&fd_waker));
                let epoll = EpollBackend::new(fd_waker, config.max_events)?;
                (Backend::Epoll(epoll), waker)
            }
            #[cfg(not(target_os = "linux"))]
            BackendKind::Epoll => {
                tracing::warn!("epoll is not available on this platform, using poll");
                let fd_waker = Arc::new(FdWaker::new()?);
                let waker = Waker::Fd(Arc::clone(&fd_waker));
                (Backend::Poll(PollBackend::new(fd_waker)), waker)
            }
        };
        debug!(backend = backend.0.name(), "readiness backend ready");
        Ok(backend)
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Backend::Poll(_) => "poll",
            #[cfg(target_os = "linux")]
            Backend::Epoll(_) => "epoll",
            Backend::Mock(_) => "mock",
        }
    }

    /// Hub of the mock backend
    pub(crate) fn mock_hub(&self) -> Option<&Arc<MockHub>> {
        match self {
            Backend::Mock(m) => Some(m.hub()),
            _ => None,
        }
    }

    /// Start watching one direction of `conn`
    pub(crate) fn watch(&mut self, conn: &ConnectionRef, direction: Direction) -> Result<()> {
        match (self, conn.source()) {
            (Backend::Poll(p), ReadinessSource::Fd(fd)) => {
                p.watch(conn.id(), fd, direction);
                Ok(())
            }
            #[cfg(target_os = "linux")]
            (Backend::Epoll(e), ReadinessSource::Fd(fd)) => e.watch(conn.id(), fd, direction),
            (Backend::Mock(m), ReadinessSource::Probe) => {
                m.watch(conn, direction);
                Ok(())
            }
            (backend, _) => Err(Error::UnsupportedSource {
                connection: conn.label(),
                backend: backend.name(),
            }),
        }
    }

    /// Stop watching one direction
    pub(crate) fn unwatch(&mut self, id: ConnectionId, direction: Direction) {
        match self {
            Backend::Poll(p) => p.unwatch(id, direction),
            #[cfg(target_os = "linux")]
            Backend::Epoll(e) => e.unwatch(id, direction),
            Backend::Mock(m) => m.unwatch(id, direction),
        }
    }

    /// Drop every interest in `id`
    pub(crate) fn forget(&mut self, id: ConnectionId) {
        match self {
            Backend::Poll(p) => p.forget(id),
            #[cfg(target_os = "linux")]
            Backend::Epoll(e) => e.forget(id),
            Backend::Mock(m) => m.forget(id),
        }
    }

    /// Block for up to `timeout`, appending ready directions to `ready`.
    /// Returns early on an interrupt with nothing appended.
    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> Result<()> {
        match self {
            Backend::Poll(p) => p.wait(timeout, ready),
            #[cfg(target_os = "linux")]
            Backend::Epoll(e) => e.wait(timeout, ready),
            Backend::Mock(m) => {
                m.wait(timeout, ready);
                Ok(())
            }
        }
    }

    /// Connections with at least one watched direction
    pub(crate) fn watched(&self) -> usize {
        match self {
            Backend::Poll(p) => p.watched(),
            #[cfg(target_os = "linux")]
            Backend::Epoll(e) => e.watched(),
            Backend::Mock(m) => m.watched(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(Duration::ZERO), 0);
        assert_eq!(timeout_ms(Duration::from_micros(10)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(7)), 7);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX / 4)), libc::c_int::MAX);
    }

    #[test]
    fn test_interest() {
        let mut i = Interest::default();
        assert!(i.is_empty());
        i.set(Direction::Write, true);
        assert!(i.wants(Direction::Write));
        assert!(!i.wants(Direction::Read));
        i.set(Direction::Write, false);
        assert!(i.is_empty());
    }

    #[test]
    fn test_mock_backend_rejects_fd_connections() {
        let (mut backend, _waker) = Backend::new(&DispatcherConfig::mock()).unwrap();
        let (a, _b) = crate::net::tcp::TcpConnection::pair().unwrap();
        let a: ConnectionRef = a;
        let err = backend.watch(&a, Direction::Read).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSource { backend: "mock", .. }));
        assert_eq!(backend.watched(), 0);
    }
}
