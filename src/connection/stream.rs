//! Stream connections
//!
//! Duplex adapter over one accepted TCP stream. Reads and writes go through
//! `&TcpStream` directly, each direction serialized by its own lock, so a
//! reader blocked in `read` never holds anything a writer needs. Closing and
//! socket options take neither lock.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{NetfrontError, Result};

/// Shared transport behind a [`StreamConnection`]
#[derive(Debug)]
pub(crate) struct DuplexStream {
    stream: TcpStream,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl DuplexStream {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// Shut down both directions; an already disconnected peer is not an error
    pub(crate) fn close(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// An accepted TCP connection
#[derive(Debug)]
pub struct StreamConnection {
    stream: Arc<DuplexStream>,
    sender: SocketAddr,
    receiver: SocketAddr,
}

impl StreamConnection {
    /// Wrap an accepted stream.
    ///
    /// Fails if the peer is already gone, since the addresses can no longer
    /// be resolved. The stream is switched to blocking mode.
    pub fn new(stream: TcpStream) -> Result<Self> {
        let sender = stream
            .peer_addr()
            .map_err(|e| NetfrontError::InvalidTransport(format!("peer address: {}", e)))?;
        let receiver = stream
            .local_addr()
            .map_err(|e| NetfrontError::InvalidTransport(format!("local address: {}", e)))?;

        // Accepted sockets inherit O_NONBLOCK from the listener on some platforms
        stream.set_nonblocking(false)?;

        Ok(Self {
            stream: Arc::new(DuplexStream::new(stream)),
            sender,
            receiver,
        })
    }

    /// Readable view of the stream
    pub fn input(&self) -> InputView {
        InputView {
            inner: Arc::clone(&self.stream),
        }
    }

    /// Writable view of the stream
    pub fn output(&self) -> OutputView {
        OutputView {
            inner: Arc::clone(&self.stream),
        }
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    pub fn receiver(&self) -> SocketAddr {
        self.receiver
    }

    /// Shut down one or both directions without touching the view locks
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.stream.stream.shutdown(how)?;
        Ok(())
    }

    /// Close the connection in both directions
    pub fn close(&self) -> Result<()> {
        self.stream.close()?;
        Ok(())
    }

    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.stream.stream.set_nodelay(nodelay)?;
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> Weak<DuplexStream> {
        Arc::downgrade(&self.stream)
    }
}

// =============================================================================
// Views
// =============================================================================

/// Read side of a [`StreamConnection`].
///
/// Cheap to clone; clones share the read lock.
#[derive(Debug, Clone)]
pub struct InputView {
    inner: Arc<DuplexStream>,
}

impl Read for InputView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _guard = self.inner.read_lock.lock();
        (&self.inner.stream).read(buf)
    }
}

/// Write side of a [`StreamConnection`].
///
/// Cheap to clone; clones share the write lock.
#[derive(Debug, Clone)]
pub struct OutputView {
    inner: Arc<DuplexStream>,
}

impl Write for OutputView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _guard = self.inner.write_lock.lock();
        (&self.inner.stream).write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // Hold the lock for the whole buffer so concurrent writers don't interleave
        let _guard = self.inner.write_lock.lock();
        (&self.inner.stream).write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _guard = self.inner.write_lock.lock();
        (&self.inner.stream).flush()
    }
}
