//! The per-endpoint I/O task.
//!
//! Each endpoint owns one driver running on the tokio runtime. The driver
//! owns the socket, executes commands strictly in submission order, and
//! forwards received datagrams to the dispatcher.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use quay_core::logging::targets;
use tokio::sync::mpsc;

use super::completion::Completion;
use super::dispatch::dispatch;
use super::endpoint::EndpointCore;
use super::options::ProtocolFamily;
use super::packet::DatagramPacket;
use super::socket::{DatagramSocket, MAX_DATAGRAM_SIZE, Scope, ensure_multicast};
use super::sys::SourceFilter;
use crate::error::{AsyncResult, DatagramError, Result};
use crate::network_info::NetworkInterface;

/// The local address a bind targets.
#[derive(Debug)]
pub(crate) enum BindTarget {
    /// A host name or literal, resolved by the driver.
    Host(String, u16),
    /// A socket address, used as is.
    Addr(SocketAddr),
    /// The wildcard address of the endpoint's family.
    Wildcard(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MembershipOp {
    Join,
    Leave,
    Block,
}

/// Work submitted by an endpoint.
#[derive(Debug)]
pub(crate) enum Command {
    Bind {
        target: BindTarget,
        completion: Completion,
    },
    Send {
        data: Bytes,
        host: String,
        port: u16,
        completion: Completion,
    },
    Membership {
        op: MembershipOp,
        group: String,
        source: Option<String>,
        interface: Option<String>,
        completion: Completion,
    },
    /// A failure detected at the call site, queued so it completes in order.
    Reject {
        error: DatagramError,
        completion: Completion,
    },
    Close {
        completion: Completion,
    },
}

impl Command {
    fn into_completion(self) -> Completion {
        match self {
            Command::Bind { completion, .. }
            | Command::Send { completion, .. }
            | Command::Membership { completion, .. }
            | Command::Reject { completion, .. }
            | Command::Close { completion } => completion,
        }
    }
}

enum Event {
    Command(Option<Command>),
    Received(io::Result<(usize, SocketAddr)>),
}

pub(crate) struct Driver {
    core: Arc<EndpointCore>,
    commands: mpsc::UnboundedReceiver<Command>,
    socket: Option<DatagramSocket>,
    bound: bool,
    receives: bool,
}

impl Driver {
    pub fn new(
        core: Arc<EndpointCore>,
        commands: mpsc::UnboundedReceiver<Command>,
        receives: bool,
    ) -> Self {
        Self {
            core,
            commands,
            socket: None,
            bound: false,
            receives,
        }
    }

    /// Run until the endpoint closes or every handle is gone.
    pub async fn run(mut self) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let reader = self.socket.as_ref().filter(|_| self.receives);
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                received = receive(reader, &mut buffer) => Event::Received(received),
            };

            match event {
                Event::Command(Some(Command::Close { completion })) => {
                    self.close(completion);
                    break;
                }
                Event::Command(Some(command)) => self.execute(command).await,
                Event::Command(None) => break,
                Event::Received(Ok((len, sender))) => {
                    let packet = DatagramPacket::new(sender, Bytes::copy_from_slice(&buffer[..len]));
                    dispatch(&self.core, packet);
                }
                Event::Received(Err(e)) => self.core.unsolicited(e.into()),
            }
        }

        tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, "driver stopped");
    }

    /// Release the socket and both handlers. Commands still queued are
    /// dropped with the receiver and fail with `ClosedEndpoint`.
    fn close(&mut self, completion: Completion) {
        self.socket = None;
        self.core.set_data_handler(None);
        self.core.set_exception_handler(None);
        tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, "socket closed");
        completion.complete(Ok(()));
    }

    async fn execute(&mut self, command: Command) {
        if self.core.phase.is_closed() {
            command
                .into_completion()
                .complete(Err(DatagramError::ClosedEndpoint));
            return;
        }

        match command {
            Command::Bind { target, completion } => {
                completion.complete(self.bind(target).await);
            }
            Command::Send {
                data,
                host,
                port,
                completion,
            } => {
                completion.complete(self.send(data, &host, port).await);
            }
            Command::Membership {
                op,
                group,
                source,
                interface,
                completion,
            } => {
                let result = self
                    .membership(op, &group, source.as_deref(), interface.as_deref())
                    .await;
                completion.complete(result);
            }
            Command::Reject { error, completion } => completion.complete(Err(error)),
            Command::Close { completion } => self.close(completion),
        }
    }

    async fn bind(&mut self, target: BindTarget) -> AsyncResult<()> {
        if self.bound {
            return Err(DatagramError::illegal_state(format!(
                "endpoint is already bound to {}",
                describe(self.core.local_address.get())
            )));
        }

        let addr = match target {
            BindTarget::Addr(addr) => addr,
            BindTarget::Host(host, port) => {
                SocketAddr::new(self.core.resolver.resolve(&host, self.family()).await?, port)
            }
            BindTarget::Wildcard(port) => SocketAddr::new(wildcard(self.family()), port),
        };

        let socket = open_for(&mut self.socket, &self.core, addr.ip())?;
        let local = socket.bind(addr)?;
        self.bound = true;
        let _ = self.core.local_address.set(local);

        tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, %local, "endpoint bound");
        Ok(())
    }

    async fn send(&mut self, data: Bytes, host: &str, port: u16) -> AsyncResult<()> {
        let ip = self.core.resolver.resolve(host, self.family()).await?;
        let target = SocketAddr::new(ip, port);

        let socket = open_for(&mut self.socket, &self.core, ip)?;
        if socket.family() == ProtocolFamily::Inet && ip.is_ipv6() {
            return Err(DatagramError::invalid_argument(format!(
                "cannot reach {target} from an IPv4 socket"
            )));
        }
        let sent = socket.send_to(&data, target).await?;

        if self.core.local_address.get().is_none() {
            let _ = self.core.local_address.set(socket.local_addr()?);
        }
        tracing::trace!(target: targets::ENDPOINT, endpoint = self.core.id, %target, bytes = sent, "datagram sent");
        Ok(())
    }

    async fn membership(
        &mut self,
        op: MembershipOp,
        group: &str,
        source: Option<&str>,
        interface: Option<&str>,
    ) -> AsyncResult<()> {
        let group = self.core.resolver.resolve(group, self.family()).await?;
        ensure_multicast(group)?;

        let source = match source {
            Some(source) => Some(
                self.core
                    .resolver
                    .resolve(source, Some(ProtocolFamily::of(group)))
                    .await?,
            ),
            None => None,
        };
        let scope = match interface {
            Some(name) => Scope::Interface(NetworkInterface::by_name(name)?),
            None => Scope::Default,
        };

        let socket = open_for(&mut self.socket, &self.core, group)?;
        match (op, source) {
            (MembershipOp::Join, None) => socket.join_group(group, &scope)?,
            (MembershipOp::Leave, None) => socket.leave_group(group, &scope)?,
            (MembershipOp::Join, Some(source)) => {
                socket.source_filter(SourceFilter::Join, group, source, &scope)?
            }
            (MembershipOp::Leave, Some(source)) => {
                socket.source_filter(SourceFilter::Leave, group, source, &scope)?
            }
            (MembershipOp::Block, Some(source)) => {
                socket.source_filter(SourceFilter::Block, group, source, &scope)?
            }
            (MembershipOp::Block, None) => {
                return Err(DatagramError::invalid_argument(
                    "blocking requires a source address",
                ));
            }
        }

        tracing::debug!(
            target: targets::MULTICAST,
            endpoint = self.core.id,
            ?op,
            %group,
            source = ?source,
            interface = ?interface,
            "membership updated"
        );
        Ok(())
    }

    /// The family of the open socket, or the one the endpoint was created with.
    fn family(&self) -> Option<ProtocolFamily> {
        self.socket
            .as_ref()
            .map(DatagramSocket::family)
            .or(self.core.family)
    }
}

/// Open the socket on first use. An endpoint without a family takes it
/// from the first address it is used with.
fn open_for<'a>(
    slot: &'a mut Option<DatagramSocket>,
    core: &EndpointCore,
    addr: IpAddr,
) -> Result<&'a DatagramSocket> {
    let socket = match slot.take() {
        Some(socket) => socket,
        None => {
            let family = core.family.unwrap_or(ProtocolFamily::of(addr));
            let options = core.options.lock().clone();
            DatagramSocket::open(family, &options)?
        }
    };
    Ok(slot.insert(socket))
}

async fn receive(
    socket: Option<&DatagramSocket>,
    buffer: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buffer).await,
        None => std::future::pending().await,
    }
}

fn wildcard(family: Option<ProtocolFamily>) -> IpAddr {
    match family {
        Some(ProtocolFamily::Inet6) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        Some(ProtocolFamily::Inet) | None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }
}

fn describe(addr: Option<&SocketAddr>) -> String {
    addr.map_or_else(|| "an unknown address".to_string(), SocketAddr::to_string)
}
