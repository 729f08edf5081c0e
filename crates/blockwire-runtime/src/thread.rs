//! A dispatcher running on its own thread
//!
//! Other threads reach the loop only through jobs: closures shipped over
//! the handle's command queue and run on the dispatcher thread at the
//! start of a cycle. Async transfers issued from here are wrapped in such
//! jobs; a job that fails to issue its transfer logs the error.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use blockwire_core::{Buffer, ConnectionRef, PinnedBlock};
use tracing::{debug, error};

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::handle::{DispatcherHandle, DispatcherState};
use crate::net::mock::MockHub;
use crate::timer::TimerHandle;

/// Thread name of every dispatcher thread
pub const THREAD_NAME: &str = "blockwire-dispatcher";

/// Owns a dispatcher running `run_loop` on a dedicated thread.
///
/// Dropping it terminates the loop and joins the thread.
pub struct DispatcherThread {
    handle: DispatcherHandle,
    mock_hub: Option<Arc<MockHub>>,
    join: Option<JoinHandle<Result<()>>>,
}

impl DispatcherThread {
    /// Create a dispatcher from `config` and start it
    pub fn spawn(config: DispatcherConfig) -> Result<Self> {
        Self::spawn_with(Dispatcher::new(config)?)
    }

    /// Start an already configured dispatcher
    pub fn spawn_with(mut dispatcher: Dispatcher) -> Result<Self> {
        let handle = dispatcher.handle();
        let mock_hub = dispatcher.mock_hub();
        let join = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || dispatcher.run_loop())
            .map_err(Error::Spawn)?;
        debug!("dispatcher thread started");
        Ok(Self {
            handle,
            mock_hub,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> &DispatcherHandle {
        &self.handle
    }

    /// Hub of a mock-backed dispatcher
    pub fn mock_hub(&self) -> Option<Arc<MockHub>> {
        self.mock_hub.clone()
    }

    pub fn state(&self) -> DispatcherState {
        self.handle.state()
    }

    /// Run `job` on the dispatcher thread
    pub fn run<F>(&self, job: F)
    where
        F: FnOnce(&mut Dispatcher) + Send + 'static,
    {
        self.handle.run(job);
    }

    pub fn add_timer<F>(&self, interval: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Dispatcher) -> bool + Send + 'static,
    {
        self.handle.add_timer(interval, callback)
    }

    pub fn cancel_timer(&self, handle: TimerHandle) {
        self.handle.cancel_timer(handle);
    }

    pub fn async_read<F>(&self, conn: ConnectionRef, n: usize, callback: F)
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef, Buffer) + Send + 'static,
    {
        self.run(move |d| {
            if let Err(e) = d.async_read(&conn, n, callback) {
                error!(conn = %conn.label(), error = %e, "async read not issued");
            }
        });
    }

    pub fn async_write<F>(&self, conn: ConnectionRef, buffer: Buffer, callback: F)
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef) + Send + 'static,
    {
        self.run(move |d| {
            if let Err(e) = d.async_write(&conn, buffer, callback) {
                error!(conn = %conn.label(), error = %e, "async write not issued");
            }
        });
    }

    pub fn async_write_block<F>(&self, conn: ConnectionRef, block: PinnedBlock, callback: F)
    where
        F: FnOnce(&mut Dispatcher, &ConnectionRef) + Send + 'static,
    {
        self.run(move |d| {
            if let Err(e) = d.async_write_block(&conn, block, callback) {
                error!(conn = %conn.label(), error = %e, "async block write not issued");
            }
        });
    }

    pub fn terminate(&self) {
        self.handle.terminate();
    }

    /// Terminate the loop and wait for the thread, returning the loop's
    /// result
    pub fn join(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        self.handle.terminate();
        let result = join.join().map_err(|_| Error::ThreadPanicked)?;
        debug!(ok = result.is_ok(), "dispatcher thread joined");
        result
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "dispatcher thread ended with an error");
        }
    }
}
