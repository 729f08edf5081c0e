//! Cross-thread control of a dispatcher
//!
//! Commands pushed here are drained at the start of the next dispatch
//! cycle; every push also interrupts a blocked backend wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::ops::{Job, TimerCallback};
use crate::timer::TimerHandle;
use crate::waker::Waker;

/// Lifecycle of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    /// `terminate` requested; the loop returns at its next check
    Terminating,
    /// `run_loop` has returned
    Stopped,
}

pub(crate) enum Command {
    AddTimer {
        handle: TimerHandle,
        interval: Duration,
        callback: TimerCallback,
    },
    CancelTimer(TimerHandle),
    Run(Job),
}

/// State shared between a dispatcher and its handles
pub(crate) struct Shared {
    terminate: AtomicBool,
    stopped: AtomicBool,
    commands: SegQueue<Command>,
    waker: Waker,
}

impl Shared {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            terminate: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            commands: SegQueue::new(),
            waker,
        }
    }

    #[inline]
    pub(crate) fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub(crate) fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub(crate) fn interrupt(&self) {
        self.waker.wake();
    }

    pub(crate) fn set_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn push(&self, command: Command) {
        self.commands.push(command);
        self.waker.wake();
    }

    pub(crate) fn pop(&self) -> Option<Command> {
        self.commands.pop()
    }

    pub(crate) fn state(&self) -> DispatcherState {
        if self.stopped.load(Ordering::Acquire) {
            DispatcherState::Stopped
        } else if self.is_terminating() {
            DispatcherState::Terminating
        } else {
            DispatcherState::Running
        }
    }
}

/// Cloneable, thread-safe handle to a dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Ask the loop to stop. Idempotent.
    pub fn terminate(&self) {
        self.shared.request_terminate();
    }

    /// Unblock a wait in progress without stopping the loop
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// Schedule a timer from any thread. The first fire is one interval
    /// after the dispatcher picks the command up.
    pub fn add_timer<F>(&self, interval: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut crate::Dispatcher) -> bool + Send + 'static,
    {
        let handle = TimerHandle::new();
        self.shared.push(Command::AddTimer {
            handle,
            interval,
            callback: Box::new(callback),
        });
        handle
    }

    pub fn cancel_timer(&self, handle: TimerHandle) {
        self.shared.push(Command::CancelTimer(handle));
    }

    /// Run `job` on the dispatcher thread during its next cycle. Jobs
    /// still queued when the loop terminates are dropped.
    pub fn run<F>(&self, job: F)
    where
        F: FnOnce(&mut crate::Dispatcher) + Send + 'static,
    {
        self.shared.push(Command::Run(Box::new(job)));
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.state()
    }

    pub fn is_terminating(&self) -> bool {
        self.shared.is_terminating()
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("state", &self.state())
            .field("queued", &self.shared.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::MockHub;

    #[test]
    fn test_state_transitions() {
        let hub = MockHub::new();
        let shared = Arc::new(Shared::new(Waker::Hub(Arc::clone(&hub))));
        let handle = DispatcherHandle::new(Arc::clone(&shared));
        assert_eq!(handle.state(), DispatcherState::Running);

        handle.terminate();
        assert!(hub.take_wake());
        assert_eq!(handle.state(), DispatcherState::Terminating);

        shared.set_stopped();
        assert_eq!(handle.state(), DispatcherState::Stopped);
    }

    #[test]
    fn test_commands_queue_in_order() {
        let hub = MockHub::new();
        let shared = Arc::new(Shared::new(Waker::Hub(hub)));
        let handle = DispatcherHandle::new(Arc::clone(&shared));

        let t = handle.add_timer(Duration::from_millis(5), |_| false);
        handle.cancel_timer(t);
        handle.run(|_| {});

        assert!(matches!(shared.pop(), Some(Command::AddTimer { handle, .. }) if handle == t));
        assert!(matches!(shared.pop(), Some(Command::CancelTimer(h)) if h == t));
        assert!(matches!(shared.pop(), Some(Command::Run(_))));
        assert!(shared.pop().is_none());
    }
}
