//! Configuration for netfront
//!
//! Centralized configuration with sensible defaults, plus the optional
//! observability hooks the server invokes at fixed lifecycle points.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, UDP_BUFFER_SIZE};
use crate::error::{NetfrontError, Result};

/// Main configuration for a netfront server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Interface/host to bind. `None` binds the IPv4 wildcard address.
    pub bind_addr: Option<String>,

    /// Port shared by the TCP listener and the UDP socket (0 = OS-chosen)
    pub port: u16,

    /// Receive buffer for one datagram; larger datagrams are truncated
    pub udp_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Worker Configuration
    // -------------------------------------------------------------------------
    /// Number of worker threads handling readiness events
    pub worker_threads: usize,

    /// Background workers never hold up a dropped server
    pub background: bool,

    /// Delay before each per-worker wake during shutdown (milliseconds)
    pub wake_delay_ms: u64,

    /// How long shutdown waits for workers after the wakes before detaching
    /// the ones still running (milliseconds)
    pub stop_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Observability
    // -------------------------------------------------------------------------
    pub hooks: Hooks,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            port: 0,
            udp_buffer_size: UDP_BUFFER_SIZE,
            worker_threads: 1,
            background: false,
            wake_delay_ms: 10,
            stop_timeout_ms: 1000,
            hooks: Hooks::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `port` on every interface
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(NetfrontError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.udp_buffer_size == 0 {
            return Err(NetfrontError::Config(
                "udp_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured host and port into one socket address.
    ///
    /// The first address the resolver returns wins.
    pub fn resolve_bind_addr(&self) -> Result<SocketAddr> {
        match self.bind_addr.as_deref() {
            None => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)),
            Some(host) => (host, self.port)
                .to_socket_addrs()
                .map_err(|e| NetfrontError::AddressResolution(format!("{}: {}", host, e)))?
                .next()
                .ok_or_else(|| {
                    NetfrontError::AddressResolution(format!("{}: no addresses", host))
                }),
        }
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the interface/host to bind
    pub fn bind_addr(mut self, host: impl Into<String>) -> Self {
        self.config.bind_addr = Some(host.into());
        self
    }

    /// Set the port shared by TCP and UDP
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the number of worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Run workers as background threads
    pub fn background(mut self, background: bool) -> Self {
        self.config.background = background;
        self
    }

    /// Set the datagram receive buffer size (in bytes)
    pub fn udp_buffer_size(mut self, size: usize) -> Self {
        self.config.udp_buffer_size = size;
        self
    }

    /// Set the per-worker wake delay used during shutdown (in milliseconds)
    pub fn wake_delay_ms(mut self, ms: u64) -> Self {
        self.config.wake_delay_ms = ms;
        self
    }

    /// Set how long shutdown waits for stuck workers (in milliseconds)
    pub fn stop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.stop_timeout_ms = ms;
        self
    }

    /// Install observability hooks
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.config.hooks = hooks;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

// =============================================================================
// Hooks
// =============================================================================

type StartHook = Arc<dyn Fn(SocketAddr, &ServerConfig) + Send + Sync>;
type StopHook = Arc<dyn Fn() + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&NetfrontError) + Send + Sync>;
type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Optional callbacks invoked synchronously at fixed points.
///
/// Every hook defaults to a no-op. Hooks run on whichever thread reaches the
/// point (the constructing thread, a worker, or the thread calling
/// `shutdown`), so they should return quickly.
#[derive(Clone, Default)]
pub struct Hooks {
    on_start: Option<StartHook>,
    on_stop: Option<StopHook>,
    on_exception: Option<ErrorHook>,
    on_tcp_accepted: Option<ConnectionHook>,
    on_udp_accepted: Option<ConnectionHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the server is bound and its workers are running
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &ServerConfig) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called at the end of `shutdown`
    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(f));
        self
    }

    /// Called for every error a worker iteration or a shutdown step reports
    pub fn on_exception<F>(mut self, f: F) -> Self
    where
        F: Fn(&NetfrontError) + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(f));
        self
    }

    /// Called after a stream connection has been queued
    pub fn on_tcp_accepted<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_tcp_accepted = Some(Arc::new(f));
        self
    }

    /// Called after a datagram connection has been queued
    pub fn on_udp_accepted<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_udp_accepted = Some(Arc::new(f));
        self
    }

    pub(crate) fn started(&self, addr: SocketAddr, config: &ServerConfig) {
        if let Some(hook) = &self.on_start {
            hook(addr, config);
        }
    }

    pub(crate) fn stopped(&self) {
        if let Some(hook) = &self.on_stop {
            hook();
        }
    }

    pub(crate) fn exception(&self, err: &NetfrontError) {
        if let Some(hook) = &self.on_exception {
            hook(err);
        }
    }

    pub(crate) fn tcp_accepted(&self, connection: &Connection) {
        if let Some(hook) = &self.on_tcp_accepted {
            hook(connection);
        }
    }

    pub(crate) fn udp_accepted(&self, connection: &Connection) {
        if let Some(hook) = &self.on_udp_accepted {
            hook(connection);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .field("on_exception", &self.on_exception.is_some())
            .field("on_tcp_accepted", &self.on_tcp_accepted.is_some())
            .field("on_udp_accepted", &self.on_udp_accepted.is_some())
            .finish()
    }
}
