//! Level-triggered epoll(7) backend
//!
//! Each connection is registered once with the union of its watched
//! directions; the event token is the raw connection id. The waker is
//! registered under a reserved token.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use blockwire_core::{ConnectionId, Direction};
use nix::errno::Errno;
use tracing::{trace, warn};

use super::{timeout_ms, Interest, Readiness};
use crate::error::{Error, Result};
use crate::waker::FdWaker;

const WAKE_TOKEN: u64 = u64::MAX;

const FAILED: u32 = (libc::EPOLLHUP | libc::EPOLLERR) as u32;

struct Watched {
    id: ConnectionId,
    fd: RawFd,
    interest: Interest,
}

fn event_mask(interest: Interest) -> u32 {
    let mut events = 0;
    if interest.read {
        events |= libc::EPOLLIN as u32;
    }
    if interest.write {
        events |= libc::EPOLLOUT as u32;
    }
    events
}

pub(crate) struct EpollBackend {
    epfd: RawFd,
    waker: Arc<FdWaker>,
    watched: HashMap<u64, Watched>,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub(crate) fn new(waker: Arc<FdWaker>, max_events: usize) -> Result<Self> {
        // SAFETY: plain syscall.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::last_os("epoll_create1"));
        }
        let backend = Self {
            epfd,
            waker,
            watched: HashMap::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        };
        backend.ctl(libc::EPOLL_CTL_ADD, backend.waker.fd(), libc::EPOLLIN as u32, WAKE_TOKEN)?;
        Ok(backend)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        // SAFETY: event lives across the call; the kernel copies it.
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) } < 0 {
            return Err(Error::last_os("epoll_ctl"));
        }
        Ok(())
    }

    pub(crate) fn watch(&mut self, id: ConnectionId, fd: RawFd, direction: Direction) -> Result<()> {
        let token = id.raw();
        let existing = self
            .watched
            .get(&token)
            .filter(|w| w.fd == fd)
            .map(|w| w.interest);
        match existing {
            Some(interest) if interest.wants(direction) => {}
            Some(mut interest) => {
                interest.set(direction, true);
                self.ctl(libc::EPOLL_CTL_MOD, fd, event_mask(interest), token)?;
                if let Some(w) = self.watched.get_mut(&token) {
                    w.interest = interest;
                }
            }
            None => {
                if let Some(stale) = self.watched.remove(&token) {
                    self.delete(stale.fd);
                }
                let mut interest = Interest::default();
                interest.set(direction, true);
                let events = event_mask(interest);
                match self.ctl(libc::EPOLL_CTL_ADD, fd, events, token) {
                    // descriptor still registered under a dropped connection
                    Err(Error::Backend {
                        errno: Errno::EEXIST,
                        ..
                    }) => {
                        self.watched.retain(|_, w| w.fd != fd);
                        self.ctl(libc::EPOLL_CTL_MOD, fd, events, token)?;
                    }
                    other => other?,
                }
                self.watched.insert(token, Watched { id, fd, interest });
            }
        }
        Ok(())
    }

    pub(crate) fn unwatch(&mut self, id: ConnectionId, direction: Direction) {
        let token = id.raw();
        let Some(w) = self.watched.get_mut(&token) else {
            return;
        };
        if !w.interest.wants(direction) {
            return;
        }
        w.interest.set(direction, false);
        let (fd, interest) = (w.fd, w.interest);
        if interest.is_empty() {
            self.watched.remove(&token);
            self.delete(fd);
        } else if let Err(e) = self.ctl(libc::EPOLL_CTL_MOD, fd, event_mask(interest), token) {
            warn!(conn = %id, fd, error = %e, "epoll modify failed");
        }
    }

    pub(crate) fn forget(&mut self, id: ConnectionId) {
        if let Some(w) = self.watched.remove(&id.raw()) {
            self.delete(w.fd);
        }
    }

    fn delete(&self, fd: RawFd) {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0) {
            Ok(()) => {}
            // already gone with the descriptor
            Err(Error::Backend {
                errno: Errno::ENOENT | Errno::EBADF,
                ..
            }) => {}
            Err(e) => warn!(fd, error = %e, "epoll delete failed"),
        }
    }

    pub(crate) fn watched(&self) -> usize {
        self.watched.len()
    }

    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> Result<()> {
        // SAFETY: events holds events.len() writable entries.
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(());
            }
            return Err(Error::Backend {
                op: "epoll_wait",
                errno,
            });
        }

        for event in &self.events[..n as usize] {
            let token = event.u64;
            let flags = event.events;
            if token == WAKE_TOKEN {
                trace!("epoll woken");
                self.waker.drain();
                continue;
            }
            let Some(w) = self.watched.get(&token) else {
                continue;
            };
            let failed = flags & FAILED != 0;
            if w.interest.read && (failed || flags & libc::EPOLLIN as u32 != 0) {
                ready.push(Readiness {
                    id: w.id,
                    direction: Direction::Read,
                });
            }
            if w.interest.write && (failed || flags & libc::EPOLLOUT as u32 != 0) {
                ready.push(Readiness {
                    id: w.id,
                    direction: Direction::Write,
                });
            }
        }
        Ok(())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        // SAFETY: epfd is owned by this backend.
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp::TcpConnection;
    use blockwire_core::{Connection, ReadinessSource};

    fn fd_of(conn: &TcpConnection) -> RawFd {
        match conn.source() {
            ReadinessSource::Fd(fd) => fd,
            ReadinessSource::Probe => unreachable!(),
        }
    }

    fn backend() -> (EpollBackend, Arc<FdWaker>) {
        let waker = Arc::new(FdWaker::new().unwrap());
        (EpollBackend::new(Arc::clone(&waker), 16).unwrap(), waker)
    }

    #[test]
    fn test_read_after_send() {
        let (mut ep, _waker) = backend();
        let (a, b) = TcpConnection::pair().unwrap();
        ep.watch(b.id(), fd_of(&b), Direction::Read).unwrap();

        let mut ready = Vec::new();
        ep.wait(Duration::from_millis(5), &mut ready).unwrap();
        assert!(ready.is_empty());

        a.send_one(b"ep").unwrap();
        ep.wait(Duration::from_secs(5), &mut ready).unwrap();
        assert_eq!(
            ready,
            vec![Readiness {
                id: b.id(),
                direction: Direction::Read
            }]
        );
    }

    #[test]
    fn test_modify_and_remove_interest() {
        let (mut ep, _waker) = backend();
        let (a, _b) = TcpConnection::pair().unwrap();
        ep.watch(a.id(), fd_of(&a), Direction::Read).unwrap();
        ep.watch(a.id(), fd_of(&a), Direction::Write).unwrap();
        ep.watch(a.id(), fd_of(&a), Direction::Write).unwrap();
        assert_eq!(ep.watched(), 1);

        let mut ready = Vec::new();
        ep.wait(Duration::from_secs(5), &mut ready).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].direction, Direction::Write);

        ep.unwatch(a.id(), Direction::Write);
        ep.unwatch(a.id(), Direction::Read);
        assert_eq!(ep.watched(), 0);
        // unknown ids are ignored
        ep.forget(a.id());
    }

    #[test]
    fn test_wake() {
        let (mut ep, waker) = backend();
        waker.wake();
        let mut ready = Vec::new();
        let start = std::time::Instant::now();
        ep.wait(Duration::from_secs(10), &mut ready).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
