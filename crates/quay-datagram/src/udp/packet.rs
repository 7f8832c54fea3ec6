//! Received datagrams.

use std::net::SocketAddr;

use bytes::Bytes;

/// A datagram delivered to a data handler.
///
/// Immutable once constructed. Two packets are equal when their senders are
/// equal and their payloads hold the same bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatagramPacket {
    sender: SocketAddr,
    data: Bytes,
}

impl DatagramPacket {
    /// Create a new packet.
    pub fn new(sender: SocketAddr, data: impl Into<Bytes>) -> Self {
        Self {
            sender,
            data: data.into(),
        }
    }

    /// The address the datagram came from.
    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    /// The datagram payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split the packet into its sender and payload.
    pub fn into_parts(self) -> (SocketAddr, Bytes) {
        (self.sender, self.data)
    }
}
