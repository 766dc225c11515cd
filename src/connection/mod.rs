//! Connection Module
//!
//! Connection objects handed to receivers.
//!
//! ## Responsibilities
//! - Wrap one accepted TCP stream or one received UDP datagram
//! - Resolve sender/receiver addresses once, at creation
//! - Give streams independent read and write views (see [`stream`])
//!
//! Both variants are immutable after construction; receivers get them as
//! `Arc<Connection>` so one connection can fan out to many receivers.

mod datagram;
mod stream;

use std::fmt;
use std::net::SocketAddr;

pub use datagram::DatagramConnection;
pub use stream::{InputView, OutputView, StreamConnection};

pub(crate) use stream::DuplexStream;

/// Default receive buffer for one datagram (1 MiB)
pub const UDP_BUFFER_SIZE: usize = 1024 * 1024;

/// A connection established with the server
#[derive(Debug)]
pub enum Connection {
    /// An accepted TCP stream
    Stream(StreamConnection),

    /// One received UDP datagram
    Datagram(DatagramConnection),
}

impl Connection {
    /// Address of the remote peer
    pub fn sender(&self) -> SocketAddr {
        match self {
            Connection::Stream(s) => s.sender(),
            Connection::Datagram(d) => d.sender(),
        }
    }

    /// Local address the connection arrived on
    pub fn receiver(&self) -> SocketAddr {
        match self {
            Connection::Stream(s) => s.receiver(),
            Connection::Datagram(d) => d.receiver(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Connection::Stream(_))
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self, Connection::Datagram(_))
    }

    pub fn as_stream(&self) -> Option<&StreamConnection> {
        match self {
            Connection::Stream(s) => Some(s),
            Connection::Datagram(_) => None,
        }
    }

    pub fn as_datagram(&self) -> Option<&DatagramConnection> {
        match self {
            Connection::Datagram(d) => Some(d),
            Connection::Stream(_) => None,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Connection::Stream(_) => "Stream",
            Connection::Datagram(_) => "Datagram",
        };
        write!(
            f,
            "{} [sender={}, receiver={}]",
            kind,
            self.sender(),
            self.receiver()
        )
    }
}
