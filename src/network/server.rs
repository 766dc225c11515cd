//! Server
//!
//! Composes the listener, the worker pool and the decoupler, and owns the
//! lifecycle `Constructing → Running → ShuttingDown → Stopped`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::listener::Listener;
use crate::config::{Hooks, ServerConfig};
use crate::connection::Connection;
use crate::decoupler::{Decoupler, Receiver};
use crate::error::{NetfrontError, Result};
use crate::worker::{Work, WorkerPool};

/// Receiver handle type accepted by [`Server`]
pub type ConnectionReceiver = Arc<dyn Receiver<Arc<Connection>>>;

/// Lower bound for the nudge interval while joining workers
const MIN_NUDGE_INTERVAL: Duration = Duration::from_millis(1);

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructing,
    Running,
    ShuttingDown,
    Stopped,
}

/// TCP + UDP connection front-end
///
/// ## Threads
/// - One poller thread owning the OS multiplexer
/// - `worker_threads` workers accepting/receiving on readiness
/// - One dispatch thread delivering connections to receivers
///
/// Construction binds and starts everything; [`shutdown`](Self::shutdown)
/// tears it down for good.
pub struct Server {
    config: ServerConfig,
    local_addr: SocketAddr,

    /// Connection queue between workers and receivers
    queue: Arc<Decoupler<Arc<Connection>>>,

    /// Taken on shutdown so the sockets close once the workers let go
    listener: Mutex<Option<Arc<Listener>>>,

    pool: Mutex<WorkerPool>,

    /// Cleared first on shutdown; workers exit once they observe it
    running: Arc<AtomicBool>,

    state: Mutex<ServerState>,
}

impl Server {
    /// Bind the sockets and start the workers.
    ///
    /// Fails synchronously, with nothing left running, if the configuration
    /// is invalid or the address cannot be bound.
    pub fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(Decoupler::new()?);
        let listener = Arc::new(Listener::bind(&config, Arc::clone(&queue))?);
        let local_addr = listener.local_addr();
        let running = Arc::new(AtomicBool::new(true));

        let work = Arc::new(AcceptWork {
            listener: Arc::clone(&listener),
            running: Arc::clone(&running),
            hooks: config.hooks.clone(),
        });

        let server = Self {
            config,
            local_addr,
            queue,
            listener: Mutex::new(Some(listener)),
            pool: Mutex::new(WorkerPool::new()),
            running,
            state: Mutex::new(ServerState::Constructing),
        };

        let spawned = server.pool.lock().spawn_many(
            "netfront-worker",
            server.config.worker_threads,
            work,
            server.config.background,
        );
        if let Err(e) = spawned {
            tracing::error!("Failed to start workers: {}", e);
            for err in server.teardown() {
                tracing::warn!("Cleanup after failed start: {}", err);
            }
            *server.state.lock() = ServerState::Stopped;
            return Err(e);
        }

        *server.state.lock() = ServerState::Running;
        tracing::info!(
            addr = %server.local_addr,
            workers = server.config.worker_threads,
            background = server.config.background,
            "Server started"
        );
        server.config.hooks.started(server.local_addr, &server.config);

        Ok(server)
    }

    /// Bind with default settings on `port`, every interface
    pub fn bind(port: u16) -> Result<Self> {
        Self::start(ServerConfig::new(port))
    }

    // =========================================================================
    // Receivers
    // =========================================================================

    /// Register a receiver for every connection.
    ///
    /// Connections that arrived while no receiver was registered are handed
    /// over now, in arrival order.
    pub fn register_receiver(&self, receiver: ConnectionReceiver) {
        self.queue.register_receiver(receiver);
    }

    /// Stop delivering new connections to `receiver`.
    ///
    /// With no receivers left, connections are held until the next
    /// registration.
    pub fn unregister_receiver(&self, receiver: &ConnectionReceiver) -> bool {
        self.queue.unregister_receiver(receiver)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the server and release every resource.
    ///
    /// Safe to call more than once; only the first call does anything. Every
    /// cleanup step is attempted even if an earlier one fails; failures are
    /// logged, passed to the exception hook, and the first one is returned.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Running {
                return Ok(());
            }
            *state = ServerState::ShuttingDown;
        }

        tracing::info!(addr = %self.local_addr, "Server shutting down");

        let errors = self.teardown();
        for err in &errors {
            tracing::error!("Shutdown step failed: {}", err);
            self.config.hooks.exception(err);
        }

        *self.state.lock() = ServerState::Stopped;
        self.config.hooks.stopped();
        tracing::info!(addr = %self.local_addr, "Server stopped");

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flag, wake, join, close, stop, in that order
    fn teardown(&self) -> Vec<NetfrontError> {
        self.running.store(false, Ordering::Release);

        let mut errors = Vec::new();
        let listener = self.listener.lock().take();

        if let Some(listener) = listener {
            let delay = self.config.wake_delay();
            let mut pool = self.pool.lock();

            // One staggered wake per worker
            for _ in 0..pool.len() {
                thread::sleep(delay);
                listener.wake();
            }

            errors.extend(pool.stop_all(
                || listener.wake(),
                delay.max(MIN_NUDGE_INTERVAL),
                self.config.stop_timeout(),
            ));
            drop(pool);

            errors.extend(listener.close());

            if Arc::strong_count(&listener) > 1 {
                tracing::warn!("Listener still referenced; sockets close when it is released");
            }
            // Last reference: both sockets close here
            drop(listener);
        }

        self.queue.stop();
        errors
    }

    /// Stop without waiting: signal and wake the workers, then detach them
    fn detach(&self) {
        self.running.store(false, Ordering::Release);

        if let Some(listener) = self.listener.lock().take() {
            let mut pool = self.pool.lock();
            for _ in 0..pool.len() {
                listener.wake();
            }
            pool.detach_all();
        }

        self.queue.stop();
        *self.state.lock() = ServerState::Stopped;
        self.config.hooks.stopped();
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Address both sockets are bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Worker threads that have not returned yet
    pub fn live_workers(&self) -> usize {
        self.pool.lock().alive()
    }

    /// Connections waiting for a first receiver
    pub fn pending_connections(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn receiver_count(&self) -> usize {
        self.queue.receiver_count()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state() != ServerState::Running {
            return;
        }

        if self.config.background {
            self.detach();
        } else if let Err(e) = self.shutdown() {
            tracing::warn!("Shutdown on drop failed: {}", e);
        }
    }
}

// =============================================================================
// Worker Loop
// =============================================================================

/// One worker iteration: wait for readiness, then accept/receive
struct AcceptWork {
    listener: Arc<Listener>,
    running: Arc<AtomicBool>,
    hooks: Hooks,
}

impl Work for AcceptWork {
    type Item = ();

    fn is_work_available(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn next_work(&self) -> Option<()> {
        None
    }

    fn do_work(&self, _item: Option<()>) -> Result<()> {
        let events = self.listener.poll_once()?;
        if events.is_empty() {
            // Explicit wake
            return Ok(());
        }
        self.listener.handle(&events)
    }

    fn on_error(&self, err: &NetfrontError) {
        tracing::warn!("Worker iteration failed: {}", err);
        self.hooks.exception(err);
    }
}
