//! Datagram connections
//!
//! An immutable snapshot of one received UDP datagram.

use std::net::SocketAddr;

use bytes::Bytes;

/// One UDP datagram received by the server
#[derive(Debug, Clone)]
pub struct DatagramConnection {
    data: Bytes,
    sender: SocketAddr,
    receiver: SocketAddr,
}

impl DatagramConnection {
    /// Copy `data` into a new snapshot.
    ///
    /// Oversized datagrams are already cut down by the listener's receive
    /// buffer (`ServerConfig::udp_buffer_size`).
    pub fn new(data: &[u8], sender: SocketAddr, receiver: SocketAddr) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            sender,
            receiver,
        }
    }

    /// The received bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    pub fn receiver(&self) -> SocketAddr {
        self.receiver
    }
}
