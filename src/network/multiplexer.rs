//! Readiness multiplexer
//!
//! `mio::Poll` needs `&mut self` to wait, so it cannot be shared by a pool of
//! threads directly. A dedicated poller thread owns the `Poll` and funnels
//! every readiness batch into a crossbeam channel; workers block on that
//! channel instead. An explicit wake is an empty batch on the same channel.
//!
//! The poller registers `mio` clones of the listener's sockets. Both clones
//! share the underlying socket with the listener, so readiness reported here
//! is drained by accepting/receiving on the listener's own handles.

use std::io;
use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
#[cfg(test)]
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use mio::net::{TcpListener as MioTcpListener, UdpSocket as MioUdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::error::{NetfrontError, Result};

const TCP_TOKEN: Token = Token(0);
const UDP_TOKEN: Token = Token(1);
const WAKE_TOKEN: Token = Token(2);

/// Events drained per `Poll::poll` call
const EVENT_CAPACITY: usize = 128;

/// A socket with pending work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The TCP listener has connections to accept
    Accept,

    /// The UDP socket has datagrams to receive
    Datagram,
}

/// Sockets owned by the poller thread for the lifetime of the registration
struct Sources {
    tcp: MioTcpListener,
    udp: MioUdpSocket,
}

/// Shared readiness multiplexer for one TCP listener and one UDP socket
pub struct Multiplexer {
    /// Readiness batches from the poller thread (and empty wake batches)
    batches: channel::Receiver<Vec<Readiness>>,

    /// Sender used for explicit wakes; keeps the channel open while we live
    wakes: Sender<Vec<Readiness>>,

    /// Interrupts the poller's blocking `poll`
    waker: Waker,

    closed: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,

    /// Set by the poller thread if it dies; taken by the first `poll_once`
    failure: Arc<Mutex<Option<String>>>,
}

impl Multiplexer {
    /// Register both sockets and start the poller thread.
    ///
    /// Both sockets must already be in non-blocking mode.
    pub fn open(tcp: TcpListener, udp: UdpSocket) -> Result<Self> {
        let poll = Poll::new()?;

        let mut sources = Sources {
            tcp: MioTcpListener::from_std(tcp),
            udp: MioUdpSocket::from_std(udp),
        };
        poll.registry()
            .register(&mut sources.tcp, TCP_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut sources.udp, UDP_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        let (tx, rx) = channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let handle = {
            let tx = tx.clone();
            let closed = Arc::clone(&closed);
            let failure = Arc::clone(&failure);
            thread::Builder::new()
                .name("netfront-poller".to_string())
                .spawn(move || poll_loop(poll, sources, tx, closed, failure))
                .map_err(|source| NetfrontError::WorkerSpawn {
                    name: "netfront-poller".to_string(),
                    source,
                })?
        };

        Ok(Self {
            batches: rx,
            wakes: tx,
            waker,
            closed,
            poller: Mutex::new(Some(handle)),
            failure,
        })
    }

    /// Block until at least one socket is ready or [`wake`](Self::wake) is
    /// called. A wake yields an empty batch.
    ///
    /// If the poller thread has died, the first caller afterwards gets the
    /// failure; later callers only see wakes.
    pub fn poll_once(&self) -> Result<Vec<Readiness>> {
        // We hold a sender ourselves, so recv only fails if we are being torn down
        let batch = self.batches.recv().unwrap_or_default();
        if let Some(reason) = self.failure.lock().take() {
            if !batch.is_empty() {
                let _ = self.wakes.send(batch);
            }
            return Err(NetfrontError::Poller(reason));
        }
        Ok(batch)
    }

    #[cfg(test)]
    pub(crate) fn poll_timeout(&self, timeout: Duration) -> Option<Vec<Readiness>> {
        self.batches.recv_timeout(timeout).ok()
    }

    /// Release exactly one thread blocked in `poll_once`
    pub fn wake(&self) {
        let _ = self.wakes.send(Vec::new());
    }

    /// Report `readiness` again.
    ///
    /// Readiness is edge-triggered; a drain that stopped early must put the
    /// event back or the rest of the backlog waits for the next edge.
    pub fn rearm(&self, readiness: Readiness) {
        let _ = self.wakes.send(vec![readiness]);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the poller thread and release its socket registrations
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // If the waker fails the poller may never return; leave it detached
        self.waker.wake()?;

        if let Some(handle) = self.poller.lock().take() {
            handle
                .join()
                .map_err(|_| NetfrontError::Shutdown("poller thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close multiplexer: {}", e);
        }
    }
}

fn poll_loop(
    mut poll: Poll,
    mut sources: Sources,
    batches: Sender<Vec<Readiness>>,
    closed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
) {
    let mut events = Events::with_capacity(EVENT_CAPACITY);

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!("Readiness poll failed: {}", e);
            report_failure(&failure, &batches, e.to_string());
            break;
        }

        if closed.load(Ordering::Acquire) {
            break;
        }

        let batch: Vec<Readiness> = events
            .iter()
            .filter_map(|event| match event.token() {
                TCP_TOKEN => Some(Readiness::Accept),
                UDP_TOKEN => Some(Readiness::Datagram),
                _ => None,
            })
            .collect();

        if !batch.is_empty() && batches.send(batch).is_err() {
            break;
        }
    }

    let registry = poll.registry();
    let _ = registry.deregister(&mut sources.tcp);
    let _ = registry.deregister(&mut sources.udp);
    tracing::trace!("Poller thread exiting");
}

/// Record why the poller stopped and release one worker to report it
fn report_failure(failure: &Mutex<Option<String>>, batches: &Sender<Vec<Readiness>>, reason: String) {
    *failure.lock() = Some(reason);
    let _ = batches.send(Vec::new());
}
