//! Multiplexed Listener
//!
//! Owns the TCP listener, the UDP socket and the readiness multiplexer, and
//! turns readiness into connection objects pushed onto the decoupler.
//!
//! ## Draining
//! `mio` readiness is edge-triggered: one event may stand for several pending
//! connections or datagrams, and no new event arrives until the socket has
//! been drained. Each handled event therefore accepts/receives until the
//! socket reports `WouldBlock`. Any number of workers may do this at once;
//! a worker that loses the race simply sees `WouldBlock`. A drain that fails
//! part-way re-arms its event before returning the error.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::multiplexer::{Multiplexer, Readiness};
use crate::config::{Hooks, ServerConfig};
use crate::connection::{Connection, DatagramConnection, DuplexStream, StreamConnection};
use crate::decoupler::Decoupler;
use crate::error::{NetfrontError, Result};

/// TCP + UDP front-end bound to one address/port
pub struct Listener {
    tcp: TcpListener,
    udp: UdpSocket,

    /// Address both sockets are bound to (port resolved if 0 was requested)
    local_addr: SocketAddr,

    multiplexer: Multiplexer,

    /// Receive buffer; the lock also serializes `recv_from` across workers
    udp_buffer: Mutex<Vec<u8>>,

    /// Cleared on close; datagram readiness is ignored afterwards
    open: AtomicBool,

    queue: Arc<Decoupler<Arc<Connection>>>,
    hooks: Hooks,

    /// Accepted streams, closed at shutdown if still alive
    streams: Mutex<Vec<Weak<DuplexStream>>>,
}

impl Listener {
    /// Bind both sockets and register them on a new multiplexer.
    ///
    /// Nothing is left open if any step fails.
    pub fn bind(config: &ServerConfig, queue: Arc<Decoupler<Arc<Connection>>>) -> Result<Self> {
        let requested = config.resolve_bind_addr()?;
        let (tcp, udp) = bind_pair(requested)?;
        let local_addr = tcp.local_addr()?;

        tcp.set_nonblocking(true)?;
        udp.set_nonblocking(true)?;

        let multiplexer = Multiplexer::open(tcp.try_clone()?, udp.try_clone()?)?;

        tracing::debug!(%local_addr, "Listener bound (tcp + udp)");

        Ok(Self {
            tcp,
            udp,
            local_addr,
            multiplexer,
            udp_buffer: Mutex::new(vec![0u8; config.udp_buffer_size]),
            open: AtomicBool::new(true),
            queue,
            hooks: config.hooks.clone(),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until a socket is ready or the multiplexer is woken
    pub fn poll_once(&self) -> Result<Vec<Readiness>> {
        self.multiplexer.poll_once()
    }

    /// Release one thread blocked in [`poll_once`](Self::poll_once)
    pub fn wake(&self) {
        self.multiplexer.wake();
    }

    /// Handle one batch of readiness events
    pub fn handle(&self, events: &[Readiness]) -> Result<()> {
        for readiness in events {
            match readiness {
                Readiness::Accept => self.drain(*readiness, || self.accept_streams())?,
                Readiness::Datagram if self.open.load(Ordering::Acquire) => {
                    self.drain(*readiness, || self.receive_datagrams())?
                }
                Readiness::Datagram => {}
            }
        }
        Ok(())
    }

    /// Run one drain; on failure the event is reported again so the rest of
    /// the backlog is not left waiting for a new edge
    fn drain(&self, readiness: Readiness, drain: impl FnOnce() -> Result<()>) -> Result<()> {
        drain().map_err(|e| {
            self.multiplexer.rearm(readiness);
            e
        })
    }

    fn accept_streams(&self) -> Result<()> {
        loop {
            match self.tcp.accept() {
                Ok((stream, peer)) => match StreamConnection::new(stream) {
                    Ok(connection) => self.publish_stream(connection),
                    Err(e) => tracing::debug!(%peer, "Dropping accepted stream: {}", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn publish_stream(&self, stream: StreamConnection) {
        {
            let mut streams = self.streams.lock();
            streams.retain(|s| s.strong_count() > 0);
            streams.push(stream.downgrade());
        }

        let connection = Arc::new(Connection::Stream(stream));
        tracing::debug!("Accepted {}", connection);

        self.queue.add(Arc::clone(&connection));
        self.hooks.tcp_accepted(&connection);
    }

    fn receive_datagrams(&self) -> Result<()> {
        loop {
            let mut buffer = self.udp_buffer.lock();
            let (len, sender) = match self.udp.recv_from(&mut buffer[..]) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP port-unreachable from an earlier send on some platforms
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };

            if len == 0 {
                continue;
            }

            let connection = Arc::new(Connection::Datagram(DatagramConnection::new(
                &buffer[..len],
                sender,
                self.local_addr,
            )));
            drop(buffer);
            tracing::debug!(bytes = len, "Received {}", connection);

            self.queue.add(Arc::clone(&connection));
            self.hooks.udp_accepted(&connection);
        }
    }

    /// Stop the multiplexer and close every stream still alive.
    ///
    /// Every step runs; failures are returned, not short-circuited. The
    /// sockets themselves close when the listener is dropped.
    pub fn close(&self) -> Vec<NetfrontError> {
        self.open.store(false, Ordering::Release);

        let mut errors = Vec::new();
        if let Err(e) = self.multiplexer.close() {
            errors.push(e);
        }

        let streams: Vec<_> = self.streams.lock().drain(..).collect();
        for stream in streams.iter().filter_map(Weak::upgrade) {
            if let Err(e) = stream.close() {
                errors.push(e.into());
            }
        }

        errors
    }
}

/// Attempts at finding a port free for both protocols when 0 was requested
const EPHEMERAL_BIND_ATTEMPTS: usize = 8;

/// Bind TCP first, then UDP on the port TCP ended up with.
///
/// With port 0 the OS picks the TCP port, which may already be taken on the
/// UDP side; in that case try again with a fresh TCP port.
fn bind_pair(requested: SocketAddr) -> Result<(TcpListener, UdpSocket)> {
    let attempts = if requested.port() == 0 {
        EPHEMERAL_BIND_ATTEMPTS
    } else {
        1
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let tcp = TcpListener::bind(requested).map_err(|source| NetfrontError::Bind {
            addr: requested,
            source,
        })?;
        let local_addr = tcp.local_addr()?;

        match UdpSocket::bind(local_addr) {
            Ok(udp) => return Ok((tcp, udp)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < attempts => {
                tracing::debug!(%local_addr, "UDP port taken, retrying ephemeral bind");
            }
            Err(source) => {
                return Err(NetfrontError::Bind {
                    addr: local_addr,
                    source,
                })
            }
        }
    }
}
