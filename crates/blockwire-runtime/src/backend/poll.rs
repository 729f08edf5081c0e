//! poll(2) backend
//!
//! The descriptor set is rebuilt on every wait, with the waker first.
//! Hang-up and error conditions are reported as readiness for every
//! watched direction so the pending transfer observes the failure.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use blockwire_core::{ConnectionId, Direction};
use nix::errno::Errno;
use tracing::trace;

use super::{timeout_ms, Interest, Readiness};
use crate::error::{Error, Result};
use crate::waker::FdWaker;

const FAILED: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

pub(crate) struct PollBackend {
    waker: Arc<FdWaker>,
    watched: HashMap<ConnectionId, (RawFd, Interest)>,
    fds: Vec<libc::pollfd>,
    ids: Vec<ConnectionId>,
}

impl PollBackend {
    pub(crate) fn new(waker: Arc<FdWaker>) -> Self {
        Self {
            waker,
            watched: HashMap::new(),
            fds: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub(crate) fn watch(&mut self, id: ConnectionId, fd: RawFd, direction: Direction) {
        let entry = self.watched.entry(id).or_insert((fd, Interest::default()));
        entry.0 = fd;
        entry.1.set(direction, true);
    }

    pub(crate) fn unwatch(&mut self, id: ConnectionId, direction: Direction) {
        if let Some((_, interest)) = self.watched.get_mut(&id) {
            interest.set(direction, false);
            if interest.is_empty() {
                self.watched.remove(&id);
            }
        }
    }

    pub(crate) fn forget(&mut self, id: ConnectionId) {
        self.watched.remove(&id);
    }

    pub(crate) fn watched(&self) -> usize {
        self.watched.len()
    }

    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> Result<()> {
        self.fds.clear();
        self.ids.clear();
        self.fds.push(libc::pollfd {
            fd: self.waker.fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        for (&id, &(fd, interest)) in &self.watched {
            let mut events = 0;
            if interest.read {
                events |= libc::POLLIN;
            }
            if interest.write {
                events |= libc::POLLOUT;
            }
            self.fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
            self.ids.push(id);
        }

        // SAFETY: fds is a live, initialized array of fds.len() entries.
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(());
            }
            return Err(Error::Backend { op: "poll", errno });
        }
        if n == 0 {
            return Ok(());
        }

        if self.fds[0].revents & libc::POLLIN != 0 {
            trace!("poll woken");
            self.waker.drain();
        }
        for (pfd, id) in self.fds[1..].iter().zip(&self.ids) {
            let revents = pfd.revents;
            if revents == 0 {
                continue;
            }
            let Some(&(_, interest)) = self.watched.get(id) else {
                continue;
            };
            let failed = revents & FAILED != 0;
            if interest.read && (failed || revents & libc::POLLIN != 0) {
                ready.push(Readiness {
                    id: *id,
                    direction: Direction::Read,
                });
            }
            if interest.write && (failed || revents & libc::POLLOUT != 0) {
                ready.push(Readiness {
                    id: *id,
                    direction: Direction::Write,
                });
            }
        }
        Ok(())
    }
}
