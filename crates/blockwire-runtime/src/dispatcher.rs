//! The dispatcher event loop
//!
//! # Cycle
//!
//! Each call to [`Dispatcher::dispatch`]:
//! 1. drains commands queued through a [`DispatcherHandle`]
//! 2. fires every due timer in deadline order
//! 3. returns early if termination was requested
//! 4. waits on the backend until the next timer deadline (at least
//!    `min_wait`), or `idle_wait` when no timer is scheduled
//! 5. drives the handler of every ready direction
//! 6. reclaims the completed prefix of each operation queue
//!
//! # Registration
//!
//! A connection has at most one handler per direction. A handler is either
//! a user callback (`add_read` / `add_write`) or the FIFO of async
//! transfers issued on that direction; only the front transfer is driven.
//! Registering a user callback replaces whatever was there, abandoning any
//! queued transfers. Issuing a transfer while a user callback is
//! registered replaces the callback.
//!
//! Handlers are taken out of the table while they run, so callbacks may
//! freely register, issue or cancel work on the same connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockwire_core::{
    Buffer, ConnectionId, ConnectionRef, Direction, PinnedBlock, PinnedByteBlock,
};
use tracing::{debug, error, trace};

use crate::backend::{Backend, Readiness};
use crate::config::{DispatcherConfig, FatalPolicy};
use crate::error::{Error, Result, TransferOp};
use crate::handle::{Command, DispatcherHandle, DispatcherState, Shared};
use crate::net::mock::MockHub;
use crate::ops::{
    AsyncCallback, OpKey, OpQueues, ReadBlockOp, ReadBufferOp, TimerCallback, WriteBlockOp,
    WriteBufferOp,
};
use crate::timer::{TimerEntry, TimerHandle, TimerQueue, TimerStats};

/// Counters kept by a dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Completed dispatch cycles
    pub cycles: u64,
    pub timers_fired: u64,
    /// Transfers whose callback fired
    pub ops_completed: u64,
    /// Transfers dropped by cancel, replacement or a fatal error
    pub ops_abandoned: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub fatal_errors: u64,
}

enum Handler {
    User(AsyncCallback),
    Ops(VecDeque<OpKey>),
}

struct Registration {
    conn: ConnectionRef,
    /// Distinguishes this registration from a later one for the same id
    serial: u64,
    read: Option<Handler>,
    write: Option<Handler>,
}

impl Registration {
    fn slot(&mut self, direction: Direction) -> &mut Option<Handler> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

/// Single-threaded, callback-driven I/O event loop
pub struct Dispatcher {
    config: DispatcherConfig,
    backend: Backend,
    registry: HashMap<ConnectionId, Registration>,
    next_serial: u64,
    timers: TimerQueue<TimerCallback>,
    ops: OpQueues,
    shared: Arc<Shared>,
    ready: Vec<Readiness>,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let (backend, waker) = Backend::new(&config)?;
        debug!(
            backend = backend.name(),
            idle_wait_ms = config.idle_wait.as_millis() as u64,
            fatal_policy = ?config.fatal_policy,
            "dispatcher created"
        );
        Ok(Self {
            timers: TimerQueue::with_capacity(config.timer_capacity),
            ready: Vec::with_capacity(config.max_events),
            config,
            backend,
            registry: HashMap::new(),
            next_serial: 0,
            ops: OpQueues::new(),
            shared: Arc::new(Shared::new(waker)),
            stats: DispatcherStats::default(),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Name of the readiness backend in use
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Hub for creating mock connections this dispatcher can watch.
    /// `None` unless the mock backend is configured.
    pub fn mock_hub(&self) -> Option<Arc<MockHub>> {
        self.backend.mock_hub().cloned()
    }

    /// Thread-safe handle for terminating, interrupting and feeding work
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::new(Arc::clone(&self.shared))
    }

    // ---------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------

    /// Call `callback` after `interval`, and again every `interval` for as
    /// long as it returns `true`. Periods are measured from the schedule
    /// time, not from when the callback ran.
    pub fn add_timer<F>(&mut self, interval: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Dispatcher) -> bool + Send + 'static,
    {
        let callback: TimerCallback = Box::new(callback);
        let entry = TimerEntry::new(TimerHandle::new(), Instant::now(), interval, callback);
        self.timers.push(entry)
    }

    /// Cancel a timer. Returns false if it already finished or was
    /// cancelled before.
    pub fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    // ---------------------------------------------------------------
    // Readiness handlers
    // ---------------------------------------------------------------

    /// Call `callback` whenever `conn` is readable; it stays registered
    /// while it returns `true`
    pub fn add_read<F>(&mut self, conn: &ConnectionRef, callback: F) -> Result<()>
    where
        F: FnMut(&mut Dispatcher) -> bool + Send + 'static,
    {
        self.add_handler(conn, Direction::Read, Box::new(callback))
    }

    /// Call `callback` whenever `conn` is writable; it stays registered
    /// while it returns `true`
    pub fn add_write<F>(&mut self, conn: &ConnectionRef, callback: F) -> Result<()>
    where
        F: FnMut(&mut Dispatcher) -> bool + Send + 'static,
    {
        self.add_handler(conn, Direction::Write, Box::new(callback))
    }

    fn add_handler(
        &mut self,
        conn: &ConnectionRef,
        direction: Direction,
        callback: AsyncCallback,
    ) -> Result<()> {
        self.check_valid(conn)?;
        self.backend.watch(conn, direction)?;
        let previous = self
            .registration(conn)
            .slot(direction)
            .replace(Handler::User(callback));
        if let Some(Handler::Ops(keys)) = previous {
            debug!(conn = %conn.label(), %direction, queued = keys.len(), "handler replaces queued transfers");
            self.abandon_keys(keys);
        }
        Ok(())
    }

    /// Remove every handler and abandon every unfinished transfer on
    /// `conn`. Abandoned transfers drop their payload (releasing pins)
    /// without firing callbacks. Returns how many were abandoned.
    pub fn cancel(&mut self, conn: &ConnectionRef) -> usize {
        let id = conn.id();
        let abandoned = self.ops.abandon_for(id);
        self.stats.ops_abandoned += abandoned as u64;
        let registered = self.registry.remove(&id).is_some();
        self.backend.forget(id);
        debug!(conn = %conn.label(), registered, abandoned, "connection cancelled");
        abandoned
    }

    /// True while `conn` has a handler or queued transfer
    pub fn is_registered(&self, conn: &ConnectionRef) -> bool {
        self.registry.contains_key(&conn.id())
    }

    // ---------------------------------------------------------------
    // Async transfers
    // ---------------------------------------------------------------

    /// Read exactly `n` bytes, then call `callback` with them. On end of
    /// stream the callback receives the shorter buffer read so far.
    pub fn async_read<F>(&mut self, conn: &ConnectionRef, n: usize, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef, Buffer) + Send + 'static,
    {
        if n == 0 {
            callback(self, conn, Buffer::empty());
            return Ok(());
        }
        self.check_valid(conn)?;
        self.backend.watch(conn, Direction::Read)?;
        let key = self
            .ops
            .push_read(ReadBufferOp::new(conn.clone(), n, Box::new(callback)));
        self.enqueue(conn, Direction::Read, key);
        Ok(())
    }

    /// Read exactly `n` bytes into the front of `block`, which must be the
    /// only handle on its byte block
    pub fn async_read_block<F>(
        &mut self,
        conn: &ConnectionRef,
        n: usize,
        block: PinnedByteBlock,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef, PinnedByteBlock, usize) + Send + 'static,
    {
        if n == 0 {
            callback(self, conn, block, 0);
            return Ok(());
        }
        if n > block.len() {
            return Err(blockwire_core::Error::RequestTooLarge {
                requested: n,
                capacity: block.len(),
            }
            .into());
        }
        if !block.is_exclusive() {
            return Err(blockwire_core::Error::BlockShared(block.byte_block().id()).into());
        }
        self.check_valid(conn)?;
        self.backend.watch(conn, Direction::Read)?;
        let key = self
            .ops
            .push_read_block(ReadBlockOp::new(conn.clone(), n, block, Box::new(callback)));
        self.enqueue(conn, Direction::Read, key);
        Ok(())
    }

    /// Send all of `buffer`, then call `callback`
    pub fn async_write<F>(&mut self, conn: &ConnectionRef, buffer: Buffer, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef) + Send + 'static,
    {
        if buffer.is_empty() {
            callback(self, conn);
            return Ok(());
        }
        self.check_valid(conn)?;
        self.backend.watch(conn, Direction::Write)?;
        let key = self
            .ops
            .push_write(WriteBufferOp::new(conn.clone(), buffer, Box::new(callback)));
        self.enqueue(conn, Direction::Write, key);
        Ok(())
    }

    /// Send the bytes of a pinned block view; the pin is held until the
    /// last byte is out
    pub fn async_write_block<F>(
        &mut self,
        conn: &ConnectionRef,
        block: PinnedBlock,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef) + Send + 'static,
    {
        if block.size() == 0 {
            callback(self, conn);
            return Ok(());
        }
        self.check_valid(conn)?;
        self.backend.watch(conn, Direction::Write)?;
        let key = self
            .ops
            .push_write_block(WriteBlockOp::new(conn.clone(), block, Box::new(callback)));
        self.enqueue(conn, Direction::Write, key);
        Ok(())
    }

    /// Copy `bytes` into a new buffer and send it
    pub fn async_write_copy<F>(&mut self, conn: &ConnectionRef, bytes: &[u8], callback: F) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef) + Send + 'static,
    {
        self.async_write(conn, Buffer::copy_from(bytes), callback)
    }

    /// True while any write transfer is unfinished
    pub fn has_pending_writes(&self) -> bool {
        self.ops.pending_writes() > 0
    }

    /// Unfinished transfers of every kind
    pub fn pending_ops(&self) -> usize {
        self.ops.pending()
    }

    // ---------------------------------------------------------------
    // Loop control
    // ---------------------------------------------------------------

    /// Request termination; `run_loop` returns at its next check
    pub fn terminate(&self) {
        self.shared.request_terminate();
    }

    /// Unblock the current or next backend wait
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.state()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.timers.stats()
    }

    /// Run `dispatch` until termination is requested or a fatal error is
    /// returned
    pub fn run_loop(&mut self) -> Result<()> {
        debug!(backend = self.backend.name(), "dispatcher loop started");
        let result = loop {
            if self.shared.is_terminating() {
                break Ok(());
            }
            if let Err(e) = self.dispatch() {
                break Err(e);
            }
        };
        self.shared.set_stopped();
        debug!(cycles = self.stats.cycles, ok = result.is_ok(), "dispatcher loop stopped");
        result
    }

    /// One cycle of the loop. Returns a transfer's fatal error under
    /// `FatalPolicy::Abort`.
    pub fn dispatch(&mut self) -> Result<()> {
        self.drain_commands();
        self.fire_timers();
        if self.shared.is_terminating() {
            return Ok(());
        }

        let timeout = self.wait_timeout(Instant::now());
        trace!(timeout_ms = timeout.as_millis() as u64, watched = self.backend.watched(), "waiting");
        self.ready.clear();
        self.backend.wait(timeout, &mut self.ready)?;

        let ready = std::mem::take(&mut self.ready);
        let mut result = Ok(());
        for &event in &ready {
            if self.shared.is_terminating() {
                break;
            }
            if let Err(e) = self.handle_ready(event) {
                match self.config.fatal_policy {
                    FatalPolicy::Abort => {
                        result = Err(e);
                        break;
                    }
                    FatalPolicy::Report => error!(error = %e, "transfer failed"),
                }
            }
        }
        self.ready = ready;

        let reclaimed = self.ops.reclaim();
        if reclaimed > 0 {
            trace!(reclaimed, "operation records reclaimed");
        }
        self.stats.cycles += 1;
        result
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn check_valid(&self, conn: &ConnectionRef) -> Result<()> {
        if conn.is_valid() {
            Ok(())
        } else {
            Err(blockwire_core::Error::InvalidConnection(conn.label()).into())
        }
    }

    fn registration(&mut self, conn: &ConnectionRef) -> &mut Registration {
        let serial = &mut self.next_serial;
        self.registry.entry(conn.id()).or_insert_with(|| {
            *serial += 1;
            Registration {
                conn: conn.clone(),
                serial: *serial,
                read: None,
                write: None,
            }
        })
    }

    /// Append a transfer to its direction's FIFO, replacing a user handler
    fn enqueue(&mut self, conn: &ConnectionRef, direction: Direction, key: OpKey) {
        let slot = self.registration(conn).slot(direction);
        if let Some(Handler::Ops(keys)) = slot {
            keys.push_back(key);
            return;
        }
        if slot.is_some() {
            debug!(conn = %conn.label(), %direction, "transfer replaces handler");
        }
        *slot = Some(Handler::Ops(VecDeque::from([key])));
    }

    fn abandon_keys(&mut self, keys: VecDeque<OpKey>) {
        for key in keys {
            if self.ops.get_mut(key).is_some_and(|op| !op.is_done()) {
                self.ops.abandon(key);
                self.stats.ops_abandoned += 1;
            }
        }
    }

    /// Stop watching a direction with no handler left
    fn release(&mut self, id: ConnectionId, direction: Direction) {
        self.backend.unwatch(id, direction);
        if self.registry.get(&id).is_some_and(Registration::is_empty) {
            self.registry.remove(&id);
        }
    }

    fn handle_ready(&mut self, event: Readiness) -> Result<()> {
        let Some(reg) = self.registry.get_mut(&event.id) else {
            return Ok(());
        };
        let serial = reg.serial;
        let conn = reg.conn.clone();
        let Some(handler) = reg.slot(event.direction).take() else {
            return Ok(());
        };

        match handler {
            Handler::User(mut callback) => {
                let keep = callback(self);
                self.settle_user(event, serial, keep.then_some(callback));
                Ok(())
            }
            Handler::Ops(mut keys) => {
                let result = self.drive(&conn, &mut keys);
                self.settle_ops(event, serial, keys);
                result
            }
        }
    }

    /// Put a user handler back after it ran, unless it asked to go or
    /// was replaced or cancelled meanwhile
    fn settle_user(&mut self, event: Readiness, serial: u64, callback: Option<AsyncCallback>) {
        let Some(reg) = self.registry.get_mut(&event.id) else {
            return;
        };
        if reg.serial != serial {
            return;
        }
        let slot = reg.slot(event.direction);
        if slot.is_some() {
            return;
        }
        match callback {
            Some(callback) => *slot = Some(Handler::User(callback)),
            None => self.release(event.id, event.direction),
        }
    }

    /// Put the remaining transfers back in front of any issued while they
    /// were being driven
    fn settle_ops(&mut self, event: Readiness, serial: u64, mut keys: VecDeque<OpKey>) {
        let current = self
            .registry
            .get_mut(&event.id)
            .filter(|reg| reg.serial == serial);
        let Some(reg) = current else {
            self.abandon_keys(keys);
            return;
        };
        let slot = reg.slot(event.direction);
        match slot.take() {
            Some(Handler::Ops(newer)) => {
                keys.extend(newer);
                *slot = Some(Handler::Ops(keys));
            }
            Some(user @ Handler::User(_)) => {
                *slot = Some(user);
                self.abandon_keys(keys);
            }
            None if keys.is_empty() => self.release(event.id, event.direction),
            None => *slot = Some(Handler::Ops(keys)),
        }
    }

    /// One transfer attempt for the front live operation in `keys`
    fn drive(&mut self, conn: &ConnectionRef, keys: &mut VecDeque<OpKey>) -> Result<()> {
        while let Some(&key) = keys.front() {
            let Some(op) = self.ops.get_mut(key) else {
                keys.pop_front();
                continue;
            };
            if op.is_done() {
                keys.pop_front();
                continue;
            }

            let outcome = op.attempt();
            let completion = match &outcome {
                Ok(transfer) if transfer.is_final() => op.finish(),
                Ok(_) => None,
                Err(_) => {
                    op.abandon();
                    None
                }
            };

            return match outcome {
                Ok(transfer) => {
                    self.count_bytes(key.kind, transfer.bytes());
                    if transfer.is_final() {
                        keys.pop_front();
                        self.stats.ops_completed += 1;
                        trace!(conn = %conn.label(), op = %key.kind, ?transfer, "transfer complete");
                        if let Some(completion) = completion {
                            completion.fire(self);
                        }
                    }
                    Ok(())
                }
                Err(source) => {
                    keys.pop_front();
                    self.stats.ops_abandoned += 1;
                    self.stats.fatal_errors += 1;
                    Err(Error::Transfer {
                        connection: conn.label(),
                        op: key.kind,
                        source,
                    })
                }
            };
        }
        Ok(())
    }

    fn count_bytes(&mut self, kind: TransferOp, n: usize) {
        if kind.is_write() {
            self.stats.bytes_written += n as u64;
        } else {
            self.stats.bytes_read += n as u64;
        }
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.shared.pop() {
            match command {
                Command::AddTimer {
                    handle,
                    interval,
                    callback,
                } => {
                    self.timers
                        .push(TimerEntry::new(handle, Instant::now(), interval, callback));
                }
                Command::CancelTimer(handle) => {
                    self.timers.cancel(handle);
                }
                Command::Run(job) => {
                    if self.shared.is_terminating() {
                        trace!("dropping job queued after terminate");
                    } else {
                        job(self);
                    }
                }
            }
        }
    }

    /// Fire every timer due at the start of this call. Survivors go back
    /// after the sweep, so a timer fires at most once per cycle.
    fn fire_timers(&mut self) {
        let now = Instant::now();
        let mut survivors = Vec::new();
        while !self.shared.is_terminating() {
            let Some(mut entry) = self.timers.pop_due(now) else {
                break;
            };
            let again = (entry.callback)(self);
            self.stats.timers_fired += 1;
            if again {
                survivors.push(entry);
            } else {
                self.timers.retire(entry.handle);
            }
        }
        for entry in survivors {
            self.timers.requeue(entry);
        }
    }

    fn wait_timeout(&mut self, now: Instant) -> Duration {
        match self.timers.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(now)
                .max(self.config.min_wait),
            None => self.config.idle_wait,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .field("registered", &self.registry.len())
            .field("timers", &self.timers.len())
            .field("pending_ops", &self.ops.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::{MockConfig, MockConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn mock_dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::mock().idle_wait(Duration::from_millis(20))).unwrap()
    }

    fn pair(d: &Dispatcher, config: MockConfig) -> (ConnectionRef, ConnectionRef) {
        let (a, b) = MockConnection::pair(&d.mock_hub().unwrap(), config);
        (a, b)
    }

    #[test]
    fn test_user_read_handler_stays_until_false() {
        let mut d = mock_dispatcher();
        let (a, b) = pair(&d, MockConfig::new());
        a.send_one(b"abc").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let reader = b.clone();
        d.add_read(&b, move |_| {
            let mut byte = [0u8; 1];
            reader.recv_one(&mut byte).unwrap();
            c.fetch_add(1, Ordering::SeqCst) < 1
        })
        .unwrap();

        d.dispatch().unwrap();
        assert!(d.is_registered(&b));
        d.dispatch().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!d.is_registered(&b));
        assert_eq!(d.backend.watched(), 0);
    }

    #[test]
    fn test_transfer_replaces_user_handler() {
        let mut d = mock_dispatcher();
        let (a, b) = pair(&d, MockConfig::new());
        d.add_read(&b, |_| panic!("replaced handler must not run"))
            .unwrap();

        let got = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        d.async_read(&b, 2, move |_, _, buf| sink.lock().unwrap().extend_from_slice(&buf))
            .unwrap();
        a.send_one(b"ok").unwrap();
        d.dispatch().unwrap();
        assert_eq!(&*got.lock().unwrap(), b"ok");
    }

    #[test]
    fn test_user_handler_abandons_queued_transfers() {
        let mut d = mock_dispatcher();
        let (_a, b) = pair(&d, MockConfig::new());
        d.async_read(&b, 4, |_, _, _| panic!("abandoned read must not fire"))
            .unwrap();
        d.add_read(&b, |_| false).unwrap();
        assert_eq!(d.stats().ops_abandoned, 1);
        assert_eq!(d.pending_ops(), 0);
    }

    #[test]
    fn test_invalid_connection_rejected() {
        let mut d = mock_dispatcher();
        let (a, _b) = MockConnection::pair(&d.mock_hub().unwrap(), MockConfig::new());
        a.close();
        let a: ConnectionRef = a;
        let err = d.async_read(&a, 1, |_, _, _| {}).unwrap_err();
        assert!(err.to_string().contains("is not valid"));
        assert!(!d.is_registered(&a));
    }

    #[test]
    fn test_read_block_validation() {
        let mut d = mock_dispatcher();
        let (_a, b) = pair(&d, MockConfig::new());
        let pool = blockwire_core::BlockPool::new(blockwire_core::PoolConfig::new()).unwrap();
        let block = pool.allocate(4).unwrap();

        let pin = block.pin().unwrap();
        let err = d.async_read_block(&b, 8, pin, |_, _, _, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(blockwire_core::Error::RequestTooLarge {
                requested: 8,
                capacity: 4
            })
        ));

        // a second handle makes in-place writes unsafe
        let pin = block.pin().unwrap();
        let err = d.async_read_block(&b, 4, pin, |_, _, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::Core(blockwire_core::Error::BlockShared(_))));
        assert_eq!(block.pin_count(), 0);
    }

    #[test]
    fn test_timer_requeued_once_per_cycle() {
        let mut d = mock_dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        d.add_timer(Duration::ZERO, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            true
        });
        std::thread::sleep(Duration::from_millis(1));
        d.dispatch().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(d.timer_stats().active, 1);
    }

    #[test]
    #[traced_test]
    fn test_cancel_is_logged() {
        let mut d = mock_dispatcher();
        let (_a, b) = pair(&d, MockConfig::new());
        d.async_read(&b, 1, |_, _, _| {}).unwrap();
        assert_eq!(d.cancel(&b), 1);
        assert!(logs_contain("connection cancelled"));
    }

    #[test]
    #[traced_test]
    fn test_report_policy_logs_fatal_error() {
        let config = DispatcherConfig::mock()
            .idle_wait(Duration::from_millis(20))
            .fatal_policy(FatalPolicy::Report);
        let mut d = Dispatcher::new(config).unwrap();
        let (_a, b) = MockConnection::pair(&d.mock_hub().unwrap(), MockConfig::new());
        let reader: ConnectionRef = b.clone();
        d.async_read(&reader, 4, |_, _, _| panic!("failed read must not complete"))
            .unwrap();

        // receiving on a locally closed end fails with NotConnected
        b.close();
        d.dispatch().unwrap();
        assert!(logs_contain("transfer failed"));
        assert_eq!(d.stats().fatal_errors, 1);
        assert!(!d.is_registered(&reader));
    }

    #[test]
    fn test_wait_timeout_clamped() {
        let mut d = mock_dispatcher();
        let now = Instant::now();
        assert_eq!(d.wait_timeout(now), Duration::from_millis(20));
        d.add_timer(Duration::ZERO, |_| false);
        assert_eq!(d.wait_timeout(Instant::now()), d.config().min_wait);
    }

    #[test]
    fn test_huge_timer_intervals_do_not_panic() {
        let mut d = mock_dispatcher();
        d.add_timer(Duration::MAX, |_| true);
        d.interrupt();
        d.dispatch().unwrap();

        let handle = d.handle();
        handle.add_timer(Duration::from_secs(u64::MAX / 2), |_| true);
        d.dispatch().unwrap();

        assert_eq!(d.timer_stats().active, 2);
        assert_eq!(d.stats().timers_fired, 0);
        assert!(d.wait_timeout(Instant::now()) > Duration::from_secs(3600));
    }
}
