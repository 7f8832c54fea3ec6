//! Network interface lookup for multicast scoping.

use std::net::{Ipv4Addr, Ipv6Addr};

use quay_core::PerfSpan;

use crate::error::{DatagramError, Result};

/// A network interface on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// Interface name (e.g., "eth0", "en0", "lo").
    pub name: String,
    /// Interface index, as used by IPv6 multicast and `group_source_req`.
    pub index: u32,
    /// IPv4 addresses assigned to this interface.
    pub ipv4_addresses: Vec<Ipv4Addr>,
    /// IPv6 addresses assigned to this interface.
    pub ipv6_addresses: Vec<Ipv6Addr>,
    /// Whether the interface is currently up.
    pub is_up: bool,
    /// Whether this is a loopback interface.
    pub is_loopback: bool,
    /// Whether the interface supports multicast.
    pub is_multicast: bool,
}

impl NetworkInterface {
    /// Get all network interfaces on the system.
    pub fn list() -> Vec<NetworkInterface> {
        netdev::get_interfaces()
            .into_iter()
            .map(|iface| NetworkInterface {
                ipv4_addresses: iface.ipv4.iter().map(|net| net.addr()).collect(),
                ipv6_addresses: iface.ipv6.iter().map(|net| net.addr()).collect(),
                is_up: iface.is_up(),
                is_loopback: iface.is_loopback(),
                is_multicast: iface.is_multicast(),
                index: iface.index,
                name: iface.name,
            })
            .collect()
    }

    /// Find an interface by its platform name.
    pub fn by_name(name: &str) -> Result<NetworkInterface> {
        let _span = PerfSpan::new("interface_lookup");
        Self::list()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| DatagramError::NoSuchInterface(name.to_string()))
    }

    /// The address IPv4 multicast memberships on this interface use.
    pub fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4_addresses.first().copied()
    }
}

/// Find an up, multicast-capable interface that has an IPv4 address.
pub fn multicast_capable_v4() -> Option<NetworkInterface> {
    NetworkInterface::list()
        .into_iter()
        .find(|iface| iface.is_up && iface.is_multicast && iface.primary_ipv4().is_some())
}
