//! Thin wrapper over the OS UDP socket.
//!
//! The socket is created with `socket2` so options can be written before the
//! first bind or send, then handed to tokio for readiness-driven I/O.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use quay_core::logging::targets;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;

use super::options::{MulticastInterface, ProtocolFamily, SocketOptions};
use super::sys::{self, SourceFilter};
use crate::error::{DatagramError, Result};
use crate::network_info::NetworkInterface;

/// Largest payload a UDP datagram can carry.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Where a membership is scoped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Let the kernel choose from the routing table.
    Default,
    /// A resolved interface.
    Interface(NetworkInterface),
}

impl Scope {
    fn index(&self) -> u32 {
        match self {
            Scope::Default => 0,
            Scope::Interface(iface) => iface.index,
        }
    }

    fn ipv4(&self) -> Result<Ipv4Addr> {
        match self {
            Scope::Default => Ok(Ipv4Addr::UNSPECIFIED),
            Scope::Interface(iface) => iface.primary_ipv4().ok_or_else(|| {
                DatagramError::invalid_argument(format!(
                    "interface {} has no IPv4 address",
                    iface.name
                ))
            }),
        }
    }
}

/// An open UDP socket.
#[derive(Debug)]
pub(crate) struct DatagramSocket {
    socket: UdpSocket,
    family: ProtocolFamily,
}

impl DatagramSocket {
    /// Create a socket of `family` with `options` applied.
    ///
    /// Must be called inside the tokio runtime.
    pub fn open(family: ProtocolFamily, options: &SocketOptions) -> Result<Self> {
        let domain = match family {
            ProtocolFamily::Inet => Domain::IPV4,
            ProtocolFamily::Inet6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        apply_options(&socket, family, options)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        tracing::debug!(target: targets::SOCKET, %family, ?options, "socket opened");
        Ok(Self { socket, family })
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let addr = self.adapt(addr);
        SockRef::from(&self.socket).bind(&addr.into())?;
        self.local_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(data, self.adapt(target)).await?)
    }

    pub async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (n, sender) = self.socket.recv_from(buffer).await?;
        Ok((n, unmap(sender)))
    }

    /// Join an any-source group.
    pub fn join_group(&self, group: IpAddr, scope: &Scope) -> Result<()> {
        match group {
            IpAddr::V4(group) => self.socket.join_multicast_v4(group, scope.ipv4()?)?,
            IpAddr::V6(group) => self.socket.join_multicast_v6(&group, scope.index())?,
        }
        Ok(())
    }

    /// Leave an any-source group.
    pub fn leave_group(&self, group: IpAddr, scope: &Scope) -> Result<()> {
        match group {
            IpAddr::V4(group) => self.socket.leave_multicast_v4(group, scope.ipv4()?)?,
            IpAddr::V6(group) => self.socket.leave_multicast_v6(&group, scope.index())?,
        }
        Ok(())
    }

    /// Join, leave, or block a `(group, source)` pair.
    pub fn source_filter(
        &self,
        op: SourceFilter,
        group: IpAddr,
        source: IpAddr,
        scope: &Scope,
    ) -> Result<()> {
        let socket = SockRef::from(&self.socket);
        match (op, group, source) {
            (SourceFilter::Join, IpAddr::V4(group), IpAddr::V4(source)) => {
                socket.join_ssm_v4(&source, &group, &scope.ipv4()?)?
            }
            (SourceFilter::Leave, IpAddr::V4(group), IpAddr::V4(source)) => {
                socket.leave_ssm_v4(&source, &group, &scope.ipv4()?)?
            }
            _ => sys::source_filter(&self.socket, op, group, source, scope.index())?,
        }
        Ok(())
    }

    /// IPv6 sockets reach IPv4 peers through v4-mapped addresses.
    fn adapt(&self, addr: SocketAddr) -> SocketAddr {
        match (self.family, addr) {
            (ProtocolFamily::Inet6, SocketAddr::V4(v4)) => {
                SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
            }
            _ => addr,
        }
    }
}

/// Report v4-mapped senders as plain IPv4 addresses.
fn unmap(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

/// Write every configured option to `socket`. Unset options are left alone.
fn apply_options(socket: &Socket, family: ProtocolFamily, options: &SocketOptions) -> Result<()> {
    if options.broadcast {
        socket.set_broadcast(true)?;
    }
    if options.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if let Some(size) = options.receive_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    match family {
        ProtocolFamily::Inet => {
            if let Some(ttl) = options.time_to_live {
                socket.set_multicast_ttl_v4(ttl)?;
            }
            if let Some(class) = options.traffic_class {
                socket.set_tos(class)?;
            }
            if options.loopback_mode_disabled {
                socket.set_multicast_loop_v4(false)?;
            }
        }
        ProtocolFamily::Inet6 => {
            if let Some(hops) = options.time_to_live {
                socket.set_multicast_hops_v6(hops)?;
            }
            if let Some(class) = options.traffic_class {
                sys::set_tclass_v6(socket, class)?;
            }
            if options.loopback_mode_disabled {
                socket.set_multicast_loop_v6(false)?;
            }
        }
    }

    if let Some(interface) = &options.multicast_interface {
        apply_multicast_interface(socket, family, interface)?;
    }
    Ok(())
}

fn apply_multicast_interface(
    socket: &Socket,
    family: ProtocolFamily,
    interface: &MulticastInterface,
) -> Result<()> {
    match (family, interface) {
        (ProtocolFamily::Inet, MulticastInterface::Address(IpAddr::V4(addr))) => {
            socket.set_multicast_if_v4(addr)?;
        }
        (ProtocolFamily::Inet, MulticastInterface::Address(IpAddr::V6(addr))) => {
            return Err(DatagramError::invalid_argument(format!(
                "IPv6 interface address {addr} on an IPv4 socket"
            )));
        }
        (ProtocolFamily::Inet, MulticastInterface::Name(name)) => {
            let addr = Scope::Interface(NetworkInterface::by_name(name)?).ipv4()?;
            socket.set_multicast_if_v4(&addr)?;
        }
        (ProtocolFamily::Inet6, MulticastInterface::Address(addr)) => {
            let index = NetworkInterface::list()
                .into_iter()
                .find(|iface| match addr {
                    IpAddr::V4(v4) => iface.ipv4_addresses.contains(v4),
                    IpAddr::V6(v6) => iface.ipv6_addresses.contains(v6),
                })
                .map(|iface| iface.index)
                .ok_or_else(|| DatagramError::NoSuchInterface(addr.to_string()))?;
            socket.set_multicast_if_v6(index)?;
        }
        (ProtocolFamily::Inet6, MulticastInterface::Name(name)) => {
            socket.set_multicast_if_v6(NetworkInterface::by_name(name)?.index)?;
        }
    }
    Ok(())
}

/// Check that `group` is in the multicast range of its family.
pub(crate) fn ensure_multicast(group: IpAddr) -> Result<()> {
    if group.is_multicast() {
        Ok(())
    } else {
        Err(DatagramError::invalid_argument(format!(
            "{group} is not a multicast address"
        )))
    }
}
