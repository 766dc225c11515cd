//! Worker threads and the pool that owns them

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::Work;
use crate::error::{NetfrontError, Result};

/// Lifecycle of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// One named OS thread driving a [`Work`] implementation
pub struct Worker {
    name: String,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
    background: bool,
}

impl Worker {
    /// Start a worker thread running `work`
    pub fn spawn<W: Work>(name: impl Into<String>, work: Arc<W>, background: bool) -> Result<Self> {
        let name = name.into();
        let state = Arc::new(AtomicU8::new(WorkerState::Running as u8));
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&*work, &thread_state))
            .map_err(|source| NetfrontError::WorkerSpawn {
                name: name.clone(),
                source,
            })?;

        tracing::trace!(worker = %name, "Worker started");

        Ok(Self {
            name,
            state,
            handle: Some(handle),
            background,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    /// True while the thread has not yet returned
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// True if called from this worker's own thread
    pub fn is_current_thread(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |h| h.thread().id() == thread::current().id())
    }

    /// Ask the loop to exit after its current iteration
    pub fn request_stop(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Wait for the thread to return
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let outcome = handle.join();
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);

        outcome.map_err(|_| NetfrontError::Shutdown(format!("worker {} panicked", self.name)))
    }

    /// Give up the join handle; the thread finishes on its own
    pub fn detach(&mut self) {
        self.request_stop();
        self.handle.take();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Never block in drop
        self.detach();
    }
}

fn run_loop<W: Work>(work: &W, state: &AtomicU8) {
    while state.load(Ordering::Acquire) == WorkerState::Running as u8 {
        if work.is_work_available() {
            let item = work.next_work();
            if let Err(e) = work.do_work(item) {
                if !work.is_work_available() {
                    // Errors while shutting down are expected; just leave
                    break;
                }
                work.on_error(&e);
            }
        } else {
            match work.suspend_time() {
                Some(delay) => thread::sleep(delay),
                None => break,
            }
        }
    }

    state.store(WorkerState::Stopped as u8, Ordering::Release);
}

// =============================================================================
// Pool
// =============================================================================

/// A fixed set of workers sharing one [`Work`] source
#[derive(Default)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `count` more workers named `{prefix}-{index}`.
    ///
    /// Workers spawned before a failure stay in the pool.
    pub fn spawn_many<W: Work>(
        &mut self,
        prefix: &str,
        count: usize,
        work: Arc<W>,
        background: bool,
    ) -> Result<()> {
        for index in 0..count {
            self.spawn(format!("{}-{}", prefix, index), Arc::clone(&work), background)?;
        }
        Ok(())
    }

    /// Add one more worker to the pool
    pub fn spawn<W: Work>(&mut self, name: String, work: Arc<W>, background: bool) -> Result<()> {
        self.workers.push(Worker::spawn(name, work, background)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of worker threads that have not returned yet
    pub fn alive(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn request_stop_all(&self) {
        for worker in &self.workers {
            worker.request_stop();
        }
    }

    /// Stop and join every worker.
    ///
    /// A worker still blocked after its stop request is nudged with `wake`
    /// every `interval` until its thread returns. Workers still running once
    /// `timeout` has passed (counted for the whole pool) are detached and
    /// reported. Join failures are collected rather than aborting the
    /// remaining joins.
    pub fn stop_all<F: Fn()>(
        &mut self,
        wake: F,
        interval: Duration,
        timeout: Duration,
    ) -> Vec<NetfrontError> {
        self.request_stop_all();
        let deadline = Instant::now() + timeout;

        let mut errors = Vec::new();
        for mut worker in self.workers.drain(..) {
            if worker.is_current_thread() {
                // Stopping from inside a worker (e.g. from a hook); it exits on return
                worker.detach();
                continue;
            }
            while worker.is_alive() && Instant::now() < deadline {
                wake();
                thread::sleep(interval);
            }
            if worker.is_alive() {
                tracing::warn!(worker = %worker.name(), "Worker did not stop in time; detaching");
                errors.push(NetfrontError::Shutdown(format!(
                    "worker {} did not stop within {:?}",
                    worker.name(),
                    timeout
                )));
                worker.detach();
                continue;
            }
            if let Err(e) = worker.join() {
                errors.push(e);
            }
        }
        errors
    }

    /// Signal every worker and drop the join handles without waiting
    pub fn detach_all(&mut self) {
        for mut worker in self.workers.drain(..) {
            worker.detach();
        }
    }
}
