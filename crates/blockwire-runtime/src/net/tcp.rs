//! Non-blocking TCP connections

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use blockwire_core::{Connection, ConnectionId, ReadinessSource};
use tracing::debug;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        // no SIGPIPE on writes to a reset peer
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
    } else {
        const SEND_FLAGS: libc::c_int = 0;
    }
}

/// TCP stream in non-blocking mode
pub struct TcpConnection {
    id: ConnectionId,
    stream: TcpStream,
    peer: Option<SocketAddr>,
    closed: AtomicBool,
}

impl TcpConnection {
    /// Wrap an established stream, switching it to non-blocking mode
    pub fn from_stream(stream: TcpStream) -> io::Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let conn = Self {
            id: ConnectionId::next(),
            stream,
            peer,
            closed: AtomicBool::new(false),
        };
        debug!(conn = %conn.id, peer = ?conn.peer, fd = conn.stream.as_raw_fd(), "tcp connection");
        Ok(Arc::new(conn))
    }

    /// Blocking connect, then non-blocking transfers
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Arc<Self>> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    /// Two ends of a loopback TCP connection
    pub fn pair() -> io::Result<(Arc<Self>, Arc<Self>)> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let client = TcpStream::connect(listener.local_addr()?)?;
        let (server, _) = listener.accept()?;
        Ok((Self::from_stream(client)?, Self::from_stream(server)?))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Shut down both directions. The descriptor stays open until drop,
    /// so its number cannot be reused while the dispatcher still knows it.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    /// Half-close the sending side
    pub fn shutdown_write(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> String {
        match self.peer {
            Some(peer) => format!("tcp:{peer}"),
            None => format!("tcp:fd{}", self.fd()),
        }
    }

    fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn source(&self) -> ReadinessSource {
        ReadinessSource::Fd(self.fd())
    }

    fn recv_one(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes of writes.
        let n = unsafe { libc::recv(self.fd(), buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn send_one(&self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes of reads.
        let n = unsafe { libc::send(self.fd(), buf.as_ptr().cast(), buf.len(), SEND_FLAGS) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_pair_transfers() {
        let (a, b) = TcpConnection::pair().unwrap();
        assert!(a.label().starts_with("tcp:127.0.0.1:"));
        assert!(matches!(a.source(), ReadinessSource::Fd(fd) if fd >= 0));

        let mut buf = [0u8; 8];
        assert_eq!(
            b.recv_one(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        assert_eq!(a.send_one(b"tcp").unwrap(), 3);
        let mut got = 0;
        for _ in 0..1000 {
            match b.recv_one(&mut buf[got..]) {
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                Err(e) => panic!("recv failed: {e}"),
            }
            if got == 3 {
                break;
            }
        }
        assert_eq!(&buf[..3], b"tcp");
    }

    #[test]
    fn test_close_gives_peer_eof() {
        let (a, b) = TcpConnection::pair().unwrap();
        a.close();
        assert!(!a.is_valid());

        let mut buf = [0u8; 4];
        let mut eof = false;
        for _ in 0..1000 {
            match b.recv_one(&mut buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                Err(e) => panic!("recv failed: {e}"),
            }
        }
        assert!(eof);
    }
}
