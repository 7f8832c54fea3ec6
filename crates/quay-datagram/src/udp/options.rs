//! Socket options for datagram endpoints.

use std::net::IpAddr;

use crate::error::{DatagramError, Result};

/// The IP protocol family of an endpoint's socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

impl ProtocolFamily {
    /// The family an address belongs to.
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => ProtocolFamily::Inet,
            IpAddr::V6(_) => ProtocolFamily::Inet6,
        }
    }
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolFamily::Inet => write!(f, "IPv4"),
            ProtocolFamily::Inet6 => write!(f, "IPv6"),
        }
    }
}

/// How the outgoing multicast interface is selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MulticastInterface {
    /// By one of the interface's addresses.
    Address(IpAddr),
    /// By interface name (e.g. `"eth0"`).
    Name(String),
}

/// Socket options applied when an endpoint's socket is created.
///
/// The default leaves every option at the OS default: nothing is written to
/// the socket unless it was explicitly configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// `SO_BROADCAST`.
    pub broadcast: bool,
    /// Inverse of `IP_MULTICAST_LOOP` / `IPV6_MULTICAST_LOOP`.
    pub loopback_mode_disabled: bool,
    /// `SO_RCVBUF` in bytes.
    pub receive_buffer_size: Option<usize>,
    /// `SO_SNDBUF` in bytes.
    pub send_buffer_size: Option<usize>,
    /// `SO_REUSEADDR`.
    pub reuse_address: bool,
    /// `IP_MULTICAST_TTL` / `IPV6_MULTICAST_HOPS`.
    pub time_to_live: Option<u32>,
    /// `IP_TOS` / `IPV6_TCLASS`.
    pub traffic_class: Option<u32>,
    /// `IP_MULTICAST_IF` / `IPV6_MULTICAST_IF`.
    pub multicast_interface: Option<MulticastInterface>,
}

impl SocketOptions {
    /// Create options with every value at the OS default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable sending to broadcast addresses.
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    /// Stop (or resume) looping sent multicast datagrams back to this host.
    pub fn loopback_mode_disabled(mut self, disabled: bool) -> Self {
        self.loopback_mode_disabled = disabled;
        self
    }

    /// Set the receive buffer size.
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }

    /// Set the send buffer size.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Allow binding to an address that is already in use.
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.reuse_address = enabled;
        self
    }

    /// Set the multicast time-to-live (hop limit).
    pub fn time_to_live(mut self, ttl: u32) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set the traffic class (type-of-service byte).
    pub fn traffic_class(mut self, class: u32) -> Self {
        self.traffic_class = Some(class);
        self
    }

    /// Select the outgoing multicast interface by address.
    pub fn interface(mut self, addr: IpAddr) -> Self {
        self.multicast_interface = Some(MulticastInterface::Address(addr));
        self
    }

    /// Select the outgoing multicast interface by name.
    pub fn network_interface(mut self, name: impl Into<String>) -> Self {
        self.multicast_interface = Some(MulticastInterface::Name(name.into()));
        self
    }

    /// Check that every configured value is in range.
    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size == Some(0) {
            return Err(DatagramError::invalid_argument(
                "receive buffer size must be positive",
            ));
        }
        if self.send_buffer_size == Some(0) {
            return Err(DatagramError::invalid_argument(
                "send buffer size must be positive",
            ));
        }
        if let Some(ttl) = self.time_to_live
            && ttl > 255
        {
            return Err(DatagramError::invalid_argument(format!(
                "time to live {ttl} is out of range 0..=255"
            )));
        }
        if let Some(class) = self.traffic_class
            && class > 255
        {
            return Err(DatagramError::invalid_argument(format!(
                "traffic class {class} is out of range 0..=255"
            )));
        }
        Ok(())
    }
}
