//! Decoupler implementation
//!
//! One coarse lock over the pending buffer and the receiver registry, and an
//! unbounded crossbeam channel feeding a dedicated dispatch thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use super::receiver::{same_receiver, Receiver};
use crate::error::{NetfrontError, Result};

/// One item bound for the receivers registered when it was queued
struct Delivery<T> {
    item: T,
    receivers: Vec<Arc<dyn Receiver<T>>>,
}

/// State guarded by the decoupler lock
struct State<T> {
    /// Items added while no receiver was registered (FIFO)
    pending: VecDeque<T>,

    /// Registered receivers; order carries no meaning
    receivers: Vec<Arc<dyn Receiver<T>>>,

    /// Job queue to the dispatch thread; `None` once stopped
    jobs: Option<Sender<Delivery<T>>>,
}

/// Generic asynchronous fan-out mailbox.
///
/// ## Guarantees
/// - `add` never blocks and never fails
/// - Items added while receivers exist go to every receiver registered at
///   that moment, in `add` order
/// - Items added while no receiver exists are held and flushed, in order, to
///   all receivers present at the first following registration
/// - After `unregister_receiver` returns, no newly added item reaches that
///   receiver; deliveries already queued for it may still run
///
/// Receivers run on a single dispatch thread, so a blocking receiver delays
/// later deliveries but never the producer.
pub struct Decoupler<T> {
    state: Mutex<State<T>>,

    /// Read by the dispatch thread to drop queued deliveries after `stop`
    stopped: Arc<AtomicBool>,
}

impl<T: Clone + Send + 'static> Decoupler<T> {
    /// Create a decoupler with its dispatch thread
    pub fn new() -> Result<Self> {
        Self::with_name("netfront-dispatch")
    }

    /// Create a decoupler whose dispatch thread carries `name`
    pub fn with_name(name: &str) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Delivery<T>>();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        // Detached: a blocked receiver must not hold up stop()
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || dispatch_loop(rx, flag))
            .map_err(|source| NetfrontError::WorkerSpawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                receivers: Vec::new(),
                jobs: Some(tx),
            }),
            stopped,
        })
    }
}

impl<T> Decoupler<T> {
    /// Queue an item for delivery, or buffer it if nobody is listening
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.jobs.is_none() {
            return;
        }

        if state.receivers.is_empty() {
            state.pending.push_back(item);
            return;
        }

        let receivers = state.receivers.clone();
        if let Some(jobs) = &state.jobs {
            // Only fails if the dispatch thread is gone, i.e. we are stopping
            let _ = jobs.send(Delivery { item, receivers });
        }
    }

    /// Register a receiver and flush any buffered items to it.
    ///
    /// Registering the same `Arc` twice has no additional effect.
    pub fn register_receiver(&self, receiver: Arc<dyn Receiver<T>>) {
        let mut state = self.state.lock();
        if state.jobs.is_none() {
            return;
        }

        if !state.receivers.iter().any(|r| same_receiver(r, &receiver)) {
            state.receivers.push(receiver);
        }

        if state.pending.is_empty() {
            return;
        }

        let State {
            pending,
            receivers,
            jobs,
        } = &mut *state;

        tracing::debug!(
            buffered = pending.len(),
            receivers = receivers.len(),
            "Flushing buffered items"
        );

        if let Some(jobs) = jobs {
            for item in pending.drain(..) {
                let _ = jobs.send(Delivery {
                    item,
                    receivers: receivers.clone(),
                });
            }
        }
    }

    /// Remove a receiver. Returns false if it was not registered.
    pub fn unregister_receiver(&self, receiver: &Arc<dyn Receiver<T>>) -> bool {
        let mut state = self.state.lock();
        let before = state.receivers.len();
        state.receivers.retain(|r| !same_receiver(r, receiver));
        state.receivers.len() != before
    }

    /// Stop dispatching. Buffered and not-yet-dispatched items are dropped.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let discarded = state.pending.len();
        state.pending.clear();
        state.receivers.clear();
        // Dropping the sender ends the dispatch loop once it drains
        state.jobs = None;

        tracing::debug!(discarded, "Decoupler stopped");
    }

    /// Number of items waiting for a first receiver
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of registered receivers
    pub fn receiver_count(&self) -> usize {
        self.state.lock().receivers.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl<T> Drop for Decoupler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Dispatch Thread
// =============================================================================

fn dispatch_loop<T: Clone>(jobs: channel::Receiver<Delivery<T>>, stopped: Arc<AtomicBool>) {
    for Delivery { item, receivers } in jobs.iter() {
        if stopped.load(Ordering::Acquire) {
            break;
        }

        for receiver in &receivers {
            let value = item.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| receiver.receive(value)));
            if outcome.is_err() {
                tracing::error!("Receiver panicked during delivery; continuing");
            }
        }
    }

    tracing::trace!("Dispatch thread exiting");
}
