//! In-process connection pairs for deterministic tests.
//!
//! A `MockHub` is the readiness source for the mock backend: every state
//! change on a mock connection bumps the hub's generation and wakes any
//! dispatcher blocked in `wait`. Connections report readiness through
//! `Connection::probe`, so they only work with `BackendKind::Mock`.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use blockwire_core::{Connection, ConnectionId, Direction, ReadinessSource};
use tracing::trace;

#[derive(Debug, Default)]
struct HubState {
    generation: u64,
    woken: bool,
}

/// Change notifier shared by mock connections and the mock backend
#[derive(Debug, Default)]
pub struct MockHub {
    state: Mutex<HubState>,
    changed: Condvar,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a connection state change
    pub fn notify(&self) {
        self.lock().generation += 1;
        self.changed.notify_all();
    }

    /// Interrupt a waiting dispatcher
    pub fn wake(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.woken = true;
        drop(state);
        self.changed.notify_all();
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Consume a pending `wake`
    pub(crate) fn take_wake(&self) -> bool {
        std::mem::take(&mut self.lock().woken)
    }

    /// Block until the generation moves past `seen` or `timeout` elapses
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) {
        let guard = self.lock();
        let _ = self
            .changed
            .wait_timeout_while(guard, timeout, |s| s.generation == seen)
            .unwrap_or_else(|e| e.into_inner());
    }
}

/// Mock connection behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct MockConfig {
    /// Most bytes returned by one `recv_one` (0 = unlimited)
    pub recv_chunk: usize,
    /// Most bytes accepted by one `send_one` (0 = unlimited)
    pub send_chunk: usize,
    /// Bytes buffered per direction before sends would block (0 = unlimited)
    pub capacity: usize,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit both directions to `n` bytes per call
    pub fn chunk_limit(mut self, n: usize) -> Self {
        self.recv_chunk = n;
        self.send_chunk = n;
        self
    }

    pub fn recv_chunk(mut self, n: usize) -> Self {
        self.recv_chunk = n;
        self
    }

    pub fn send_chunk(mut self, n: usize) -> Self {
        self.send_chunk = n;
        self
    }

    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }
}

#[inline]
fn limit(n: usize, cap: usize) -> usize {
    if cap == 0 {
        n
    } else {
        n.min(cap)
    }
}

#[derive(Debug, Default)]
struct PipeState {
    bytes: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
}

/// One direction of a mock pair
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One end of an in-process byte channel
pub struct MockConnection {
    id: ConnectionId,
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    hub: Arc<MockHub>,
    config: MockConfig,
    closed: AtomicBool,
}

impl MockConnection {
    /// Two connected ends; bytes sent on one are received on the other
    pub fn pair(hub: &Arc<MockHub>, config: MockConfig) -> (Arc<Self>, Arc<Self>) {
        let ab = Arc::new(Pipe::default());
        let ba = Arc::new(Pipe::default());
        let a = Arc::new(Self {
            id: ConnectionId::next(),
            inbound: Arc::clone(&ba),
            outbound: Arc::clone(&ab),
            hub: Arc::clone(hub),
            config,
            closed: AtomicBool::new(false),
        });
        let b = Arc::new(Self {
            id: ConnectionId::next(),
            inbound: ab,
            outbound: ba,
            hub: Arc::clone(hub),
            config,
            closed: AtomicBool::new(false),
        });
        (a, b)
    }

    /// Close this end: the peer sees end of stream on read and a broken
    /// pipe on write; local calls fail with `NotConnected`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inbound.lock().reader_closed = true;
        self.outbound.lock().writer_closed = true;
        self.hub.notify();
        trace!(conn = %self.id, "mock connection closed");
    }

    /// Half-close: the peer reads end of stream once it drains the data
    pub fn shutdown_write(&self) {
        self.outbound.lock().writer_closed = true;
        self.hub.notify();
    }

    /// Bytes sent by the peer and not yet received
    pub fn available(&self) -> usize {
        self.inbound.lock().bytes.len()
    }

    fn not_connected() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "mock connection closed")
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> String {
        format!("mock:{}", self.id.raw())
    }

    fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn source(&self) -> ReadinessSource {
        ReadinessSource::Probe
    }

    fn probe(&self, direction: Direction) -> bool {
        if !self.is_valid() {
            return true;
        }
        match direction {
            Direction::Read => {
                let pipe = self.inbound.lock();
                !pipe.bytes.is_empty() || pipe.writer_closed
            }
            Direction::Write => {
                let pipe = self.outbound.lock();
                pipe.reader_closed
                    || self.config.capacity == 0
                    || pipe.bytes.len() < self.config.capacity
            }
        }
    }

    fn recv_one(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_valid() {
            return Err(Self::not_connected());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let mut pipe = self.inbound.lock();
        if pipe.bytes.is_empty() {
            return if pipe.writer_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = limit(buf.len().min(pipe.bytes.len()), self.config.recv_chunk);
        for (dst, src) in buf.iter_mut().zip(pipe.bytes.drain(..n)) {
            *dst = src;
        }
        drop(pipe);
        self.hub.notify();
        Ok(n)
    }

    fn send_one(&self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_valid() {
            return Err(Self::not_connected());
        }
        let mut pipe = self.outbound.lock();
        if pipe.reader_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let room = if self.config.capacity == 0 {
            usize::MAX
        } else {
            self.config.capacity.saturating_sub(pipe.bytes.len())
        };
        if room == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = limit(buf.len().min(room), self.config.send_chunk);
        pipe.bytes.extend(&buf[..n]);
        drop(pipe);
        self.hub.notify();
        Ok(n)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_pair_moves_bytes() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        assert!(!b.probe(Direction::Read));
        assert_eq!(a.send_one(b"ping").unwrap(), 4);
        assert!(b.probe(Direction::Read));
        assert_eq!(b.available(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(b.recv_one(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(
            b.recv_one(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_chunk_and_capacity_limits() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new().send_chunk(3).capacity(5));
        assert_eq!(a.send_one(b"abcdefgh").unwrap(), 3);
        assert_eq!(a.send_one(b"defgh").unwrap(), 2);
        assert!(!a.probe(Direction::Write));
        assert_eq!(a.send_one(b"fgh").unwrap_err().kind(), io::ErrorKind::WouldBlock);

        let mut buf = [0u8; 2];
        assert_eq!(b.recv_one(&mut buf).unwrap(), 2);
        assert!(a.probe(Direction::Write));
    }

    #[test]
    fn test_close_semantics() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        a.send_one(b"tail").unwrap();
        a.close();
        assert!(!a.is_valid());

        let mut buf = [0u8; 8];
        assert_eq!(b.recv_one(&mut buf).unwrap(), 4);
        assert_eq!(b.recv_one(&mut buf).unwrap(), 0);
        assert_eq!(b.send_one(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(
            a.recv_one(&mut buf).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn test_dropping_one_end_closes_it() {
        let hub = MockHub::new();
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.recv_one(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_hub_wakes_waiter() {
        let hub = MockHub::new();
        let seen = hub.generation();
        let notifier = Arc::clone(&hub);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.wake();
        });

        let start = Instant::now();
        hub.wait_for_change(seen, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(hub.take_wake());
        assert!(!hub.take_wake());
        t.join().unwrap();
    }
}
