//! Cross-thread wakeup for a blocked backend wait.
//!
//! OS backends watch a descriptor: an eventfd on Linux, the read end of a
//! non-blocking pipe elsewhere. Multiple wakes before the loop drains the
//! descriptor coalesce into one. The mock backend is woken through its hub.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::errno::Errno;

use crate::error::{Error, Result};
use crate::net::mock::MockHub;

/// Wakeup side shared with other threads; the backend keeps the other
pub(crate) enum Waker {
    Fd(Arc<FdWaker>),
    Hub(Arc<MockHub>),
}

impl Waker {
    pub(crate) fn wake(&self) {
        match self {
            Waker::Fd(w) => w.wake(),
            Waker::Hub(hub) => hub.wake(),
        }
    }
}

pub(crate) struct FdWaker {
    read_fd: RawFd,
    write_fd: RawFd,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// (read end, write end); one eventfd serves as both
        fn wake_fds() -> Result<(RawFd, RawFd)> {
            // SAFETY: plain syscall, no pointers.
            let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            if fd < 0 {
                return Err(Error::last_os("eventfd"));
            }
            Ok((fd, fd))
        }
    } else {
        /// (read end, write end) of a non-blocking pipe
        fn wake_fds() -> Result<(RawFd, RawFd)> {
            let mut fds = [0 as libc::c_int; 2];
            // SAFETY: fds has room for the two descriptors pipe() writes.
            if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
                return Err(Error::last_os("pipe"));
            }
            for fd in fds {
                // SAFETY: fd was just returned by pipe().
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }
            }
            Ok((fds[0], fds[1]))
        }
    }
}

impl FdWaker {
    pub(crate) fn new() -> Result<Self> {
        let (read_fd, write_fd) = wake_fds()?;
        Ok(Self { read_fd, write_fd })
    }

    /// Descriptor that becomes readable after `wake`
    pub(crate) fn fd(&self) -> RawFd {
        self.read_fd
    }

    pub(crate) fn wake(&self) {
        let val: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64.
        let ret = unsafe {
            libc::write(
                self.write_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN: counter or pipe is full, so a wakeup is already pending
        if ret < 0 && Errno::last() != Errno::EAGAIN {
            tracing::warn!(errno = %Errno::last(), "waker write failed");
        }
    }

    /// Consume pending wakeups
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: reads into a live stack buffer of buf.len() bytes.
            let ret = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if ret <= 0 {
                break;
            }
        }
    }
}

impl Drop for FdWaker {
    fn drop(&mut self) {
        // SAFETY: both descriptors are owned by this waker.
        unsafe {
            libc::close(self.read_fd);
            if self.write_fd != self.read_fd {
                libc::close(self.write_fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd.
        unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
    }

    #[test]
    fn test_wake_then_drain() {
        let w = FdWaker::new().unwrap();
        assert!(!readable(w.fd()));
        w.wake();
        w.wake();
        assert!(readable(w.fd()));
        w.drain();
        assert!(!readable(w.fd()));
    }

    #[test]
    fn test_hub_waker() {
        let hub = MockHub::new();
        let waker = Waker::Hub(Arc::clone(&hub));
        waker.wake();
        assert!(hub.take_wake());
    }
}
