//! In-process backend for probe-driven connections

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockwire_core::{ConnectionId, ConnectionRef, Direction};

use super::{Interest, Readiness};
use crate::net::mock::MockHub;
use crate::timer::deadline_after;

pub(crate) struct MockBackend {
    hub: Arc<MockHub>,
    watched: HashMap<ConnectionId, (ConnectionRef, Interest)>,
}

impl MockBackend {
    pub(crate) fn new(hub: Arc<MockHub>) -> Self {
        Self {
            hub,
            watched: HashMap::new(),
        }
    }

    pub(crate) fn hub(&self) -> &Arc<MockHub> {
        &self.hub
    }

    pub(crate) fn watch(&mut self, conn: &ConnectionRef, direction: Direction) {
        let entry = self
            .watched
            .entry(conn.id())
            .or_insert_with(|| (conn.clone(), Interest::default()));
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

    fn scan(&self, ready: &mut Vec<Readiness>) {
        for (&id, (conn, interest)) in &self.watched {
            for direction in [Direction::Read, Direction::Write] {
                if interest.wants(direction) && conn.probe(direction) {
                    ready.push(Readiness { id, direction });
                }
            }
        }
    }

    /// Probe every watched connection; sleep on the hub until a change,
    /// a wake, or the deadline
    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) {
        let deadline = deadline_after(Instant::now(), timeout);
        loop {
            let seen = self.hub.generation();
            let before = ready.len();
            self.scan(ready);
            if ready.len() > before || self.hub.take_wake() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            self.hub.wait_for_change(seen, deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::{MockConfig, MockConnection};
    use blockwire_core::Connection;
    use std::thread;

    #[test]
    fn test_probe_readiness() {
        let hub = MockHub::new();
        let mut backend = MockBackend::new(Arc::clone(&hub));
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        let (a, b): (ConnectionRef, ConnectionRef) = (a, b);
        backend.watch(&b, Direction::Read);

        let mut ready = Vec::new();
        backend.wait(Duration::from_millis(5), &mut ready);
        assert!(ready.is_empty());

        a.send_one(b"m").unwrap();
        backend.wait(Duration::from_secs(5), &mut ready);
        assert_eq!(
            ready,
            vec![Readiness {
                id: b.id(),
                direction: Direction::Read
            }]
        );

        backend.forget(b.id());
        assert_eq!(backend.watched(), 0);
    }

    #[test]
    fn test_wakes_on_change_from_other_thread() {
        let hub = MockHub::new();
        let mut backend = MockBackend::new(Arc::clone(&hub));
        let (a, b) = MockConnection::pair(&hub, MockConfig::new());
        let b: ConnectionRef = b;
        backend.watch(&b, Direction::Read);

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a.send_one(b"late").unwrap();
            a
        });
        let mut ready = Vec::new();
        backend.wait(Duration::from_secs(10), &mut ready);
        assert_eq!(ready.len(), 1);
        drop(t.join().unwrap());
    }

    #[test]
    fn test_unbounded_timeout_after_wake() {
        let hub = MockHub::new();
        let mut backend = MockBackend::new(Arc::clone(&hub));
        hub.wake();
        let mut ready = Vec::new();
        backend.wait(Duration::MAX, &mut ready);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_hub_wake_returns_empty() {
        let hub = MockHub::new();
        let mut backend = MockBackend::new(Arc::clone(&hub));
        hub.wake();
        let mut ready = Vec::new();
        let start = Instant::now();
        backend.wait(Duration::from_secs(10), &mut ready);
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
