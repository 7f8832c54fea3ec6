//! Source-specific multicast socket options not covered by `socket2`.
//!
//! `socket2` handles IPv4 source-specific join and leave. Blocking a source,
//! and every IPv6 source filter, use the protocol-independent `MCAST_*`
//! options (RFC 3678), which take a `group_source_req`.

use std::io;
use std::net::IpAddr;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_vendor = "apple"
))]
use std::os::fd::AsRawFd;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_vendor = "apple"
))]
use super::options::ProtocolFamily;

/// A source-filter operation on a `(group, source)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SourceFilter {
    /// Join the group, accepting only the source.
    Join,
    /// Leave a source-specific membership.
    Leave,
    /// Drop datagrams from the source while staying in the group.
    Block,
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_vendor = "apple"
))]
fn to_storage(addr: IpAddr) -> libc::sockaddr_storage {
    socket2::SockAddr::from(std::net::SocketAddr::new(addr, 0)).as_storage()
}

/// Apply a source filter to `socket`.
///
/// `interface` is an interface index; 0 lets the kernel pick one from the
/// routing table.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_vendor = "apple"
))]
pub(crate) fn source_filter(
    socket: &impl AsRawFd,
    op: SourceFilter,
    group: IpAddr,
    source: IpAddr,
    interface: u32,
) -> io::Result<()> {
    if ProtocolFamily::of(group) != ProtocolFamily::of(source) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "group and source must belong to the same address family",
        ));
    }

    let level = match group {
        IpAddr::V4(_) => libc::IPPROTO_IP,
        IpAddr::V6(_) => libc::IPPROTO_IPV6,
    };
    let name = match op {
        SourceFilter::Join => libc::MCAST_JOIN_SOURCE_GROUP,
        SourceFilter::Leave => libc::MCAST_LEAVE_SOURCE_GROUP,
        SourceFilter::Block => libc::MCAST_BLOCK_SOURCE,
    };

    // SAFETY: group_source_req is plain old data; all-zero is a valid value.
    let mut request: libc::group_source_req = unsafe { std::mem::zeroed() };
    request.gsr_interface = interface;
    request.gsr_group = to_storage(group);
    request.gsr_source = to_storage(source);

    // SAFETY:
    // - the descriptor is owned by a live socket for the duration of the call
    // - `request` is a fully initialized group_source_req and optlen matches it
    // - setsockopt only reads from the pointer
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &request as *const libc::group_source_req as *const libc::c_void,
            std::mem::size_of::<libc::group_source_req>() as libc::socklen_t,
        )
    };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_vendor = "apple"
)))]
pub(crate) fn source_filter<S>(
    _socket: &S,
    _op: SourceFilter,
    _group: IpAddr,
    _source: IpAddr,
    _interface: u32,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "source filters are not supported on this platform",
    ))
}

/// Set the IPv6 traffic class (`IPV6_TCLASS`).
#[cfg(unix)]
pub(crate) fn set_tclass_v6(socket: &impl std::os::fd::AsRawFd, class: u32) -> io::Result<()> {
    let value = class as libc::c_int;

    // SAFETY:
    // - the descriptor is owned by a live socket for the duration of the call
    // - `value` is a valid c_int and optlen matches its size
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub(crate) fn set_tclass_v6<S>(_socket: &S, _class: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "IPv6 traffic class is not supported on this platform",
    ))
}

#[cfg(all(
    test,
    any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_vendor = "apple"
    )
))]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket};

    #[test]
    fn test_to_storage_v4() {
        let storage = to_storage(IpAddr::V4(Ipv4Addr::new(232, 1, 2, 3)));
        assert_eq!(storage.ss_family, libc::AF_INET as libc::sa_family_t);
        // SAFETY: the storage was written as a sockaddr_in above.
        let sin = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
        assert_eq!(sin.sin_addr.s_addr.to_ne_bytes(), [232, 1, 2, 3]);
    }

    #[test]
    fn test_mixed_families_rejected() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let err = source_filter(
            &socket,
            SourceFilter::Join,
            "232.1.1.1".parse().unwrap(),
            "::1".parse().unwrap(),
            0,
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_block_source_on_joined_group() {
        let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
        socket
            .join_multicast_v4(&Ipv4Addr::new(230, 0, 0, 9), &Ipv4Addr::UNSPECIFIED)
            .unwrap();
        source_filter(
            &socket,
            SourceFilter::Block,
            "230.0.0.9".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            0,
        )
        .unwrap();
    }
}
