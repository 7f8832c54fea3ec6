//! UDP endpoints.
//!
//! An [`Endpoint`] is a handle to one UDP socket. It starts *configurable*:
//! socket options may be changed freely. The first send, listen, or
//! membership call makes it *active*, after which options are frozen. Every
//! completion and data callback runs on the endpoint's [`Context`].
//!
//! # Example
//!
//! ```ignore
//! use quay_core::EventLoop;
//! use quay_datagram::{DatagramFactory, handler};
//!
//! let event_loop = EventLoop::new("udp");
//! let factory = DatagramFactory::new(event_loop.context().clone());
//!
//! let server = factory.create_server(None);
//! server.data_handler(|packet| println!("{} bytes from {}", packet.len(), packet.sender()));
//! server.listen_on("127.0.0.1", 1234, None);
//!
//! let client = factory.create_client();
//! client.send_str("hello", "127.0.0.1", 1234, handler(|result| {
//!     if let Err(e) = result {
//!         eprintln!("send failed: {e}");
//!     }
//! }));
//! ```

use std::marker::PhantomData;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use quay_core::Context;
use quay_core::logging::targets;
use tokio::sync::mpsc;

use super::completion::{Completion, Handler};
use super::driver::{BindTarget, Command, MembershipOp};
use super::options::{MulticastInterface, ProtocolFamily, SocketOptions};
use super::packet::DatagramPacket;
use super::phase::{Phase, PhaseCell};
use crate::dns::HostResolver;
use crate::error::{DatagramError, Result};
use crate::network_info::NetworkInterface;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type DataHandler = Arc<dyn Fn(DatagramPacket) + Send + Sync>;
pub(crate) type ExceptionHandler = Arc<dyn Fn(DatagramError) + Send + Sync>;

mod sealed {
    pub trait Sealed {}
}

/// The role of an endpoint: [`Client`] or [`Server`].
pub trait Role: sealed::Sealed + Send + Sync + 'static {
    /// Whether endpoints of this role read inbound datagrams.
    const RECEIVES: bool;
    /// Role name used in logs.
    const NAME: &'static str;
}

/// Send-only endpoints.
#[derive(Debug)]
pub enum Client {}

/// Endpoints that can listen, join multicast groups, and receive datagrams.
#[derive(Debug)]
pub enum Server {}

impl sealed::Sealed for Client {}
impl sealed::Sealed for Server {}

impl Role for Client {
    const RECEIVES: bool = false;
    const NAME: &'static str = "client";
}

impl Role for Server {
    const RECEIVES: bool = true;
    const NAME: &'static str = "server";
}

/// A send-only UDP endpoint.
pub type DatagramClient = Endpoint<Client>;

/// A UDP endpoint that can also listen and join multicast groups.
pub type DatagramServer = Endpoint<Server>;

/// State shared between an endpoint's handles and its driver.
pub(crate) struct EndpointCore {
    pub id: u64,
    pub context: Context,
    pub family: Option<ProtocolFamily>,
    pub phase: PhaseCell,
    pub options: Mutex<SocketOptions>,
    pub local_address: OnceLock<SocketAddr>,
    pub resolver: Arc<HostResolver>,
    data_handler: RwLock<Option<DataHandler>>,
    exception_handler: RwLock<Option<ExceptionHandler>>,
}

impl EndpointCore {
    pub fn new(
        context: Context,
        family: Option<ProtocolFamily>,
        resolver: Arc<HostResolver>,
    ) -> Self {
        Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            context,
            family,
            phase: PhaseCell::default(),
            options: Mutex::new(SocketOptions::default()),
            local_address: OnceLock::new(),
            resolver,
            data_handler: RwLock::new(None),
            exception_handler: RwLock::new(None),
        }
    }

    /// Run `task` on the endpoint's context.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.context.schedule(task) {
            tracing::warn!(
                target: targets::ENDPOINT,
                endpoint = self.id,
                context = %self.context.id(),
                error = %e,
                "dropping callback for stopped context"
            );
        }
    }

    /// Route an error nobody asked for to the exception handler, or to the
    /// context's reporter when none is installed.
    pub fn unsolicited(&self, error: DatagramError) {
        match self.exception_handler.read().clone() {
            Some(handler) => self.post(move || handler(error)),
            None => {
                let context = self.context.clone();
                self.post(move || context.report_exception(&error));
            }
        }
    }

    pub fn data_handler(&self) -> Option<DataHandler> {
        self.data_handler.read().clone()
    }

    pub fn set_data_handler(&self, handler: Option<DataHandler>) {
        *self.data_handler.write() = handler;
    }

    pub fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *self.exception_handler.write() = handler;
    }
}

/// A handle to a UDP endpoint.
///
/// Handles are cheap to clone; all clones drive the same socket. The socket
/// is released on [`close`](Endpoint::close), or once every handle is
/// dropped.
pub struct Endpoint<R: Role> {
    core: Arc<EndpointCore>,
    commands: mpsc::UnboundedSender<Command>,
    _role: PhantomData<R>,
}

impl<R: Role> Endpoint<R> {
    pub(crate) fn new(core: Arc<EndpointCore>, commands: mpsc::UnboundedSender<Command>) -> Self {
        tracing::debug!(
            target: targets::ENDPOINT,
            endpoint = core.id,
            role = R::NAME,
            family = ?core.family,
            context = %core.context.id(),
            "endpoint created"
        );
        Self {
            core,
            commands,
            _role: PhantomData,
        }
    }

    /// The context every callback of this endpoint runs on.
    pub fn context(&self) -> &Context {
        &self.core.context
    }

    /// The protocol family requested at creation, if any.
    pub fn family(&self) -> Option<ProtocolFamily> {
        self.core.family
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.core.phase.get()
    }

    /// The bound local address.
    ///
    /// Set by a successful listen, or by the first successful send of an
    /// unbound endpoint. Never changes afterwards.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.core.local_address.get().copied()
    }

    /// Whether `other` is a handle to the same endpoint.
    pub fn same_endpoint(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    // -------------------------------------------------------------------------
    // Options
    // -------------------------------------------------------------------------

    /// A snapshot of the configured options.
    pub fn options(&self) -> SocketOptions {
        self.core.options.lock().clone()
    }

    pub fn broadcast(&self) -> bool {
        self.core.options.lock().broadcast
    }

    pub fn loopback_mode_disabled(&self) -> bool {
        self.core.options.lock().loopback_mode_disabled
    }

    pub fn receive_buffer_size(&self) -> Option<usize> {
        self.core.options.lock().receive_buffer_size
    }

    pub fn send_buffer_size(&self) -> Option<usize> {
        self.core.options.lock().send_buffer_size
    }

    pub fn reuse_address(&self) -> bool {
        self.core.options.lock().reuse_address
    }

    pub fn time_to_live(&self) -> Option<u32> {
        self.core.options.lock().time_to_live
    }

    pub fn traffic_class(&self) -> Option<u32> {
        self.core.options.lock().traffic_class
    }

    /// The outgoing multicast interface, when selected by address.
    pub fn interface(&self) -> Option<IpAddr> {
        match &self.core.options.lock().multicast_interface {
            Some(MulticastInterface::Address(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// The outgoing multicast interface, when selected by name.
    pub fn network_interface(&self) -> Option<String> {
        match &self.core.options.lock().multicast_interface {
            Some(MulticastInterface::Name(name)) => Some(name.clone()),
            _ => None,
        }
    }

    /// Allow sending to broadcast addresses (`SO_BROADCAST`).
    ///
    /// # Errors
    ///
    /// [`DatagramError::IllegalState`] once the endpoint is active. The same
    /// holds for every other setter.
    pub fn set_broadcast(&self, enabled: bool) -> Result<&Self> {
        self.configure(|options| options.broadcast = enabled)
    }

    /// Stop looping sent multicast datagrams back to this host.
    pub fn set_loopback_mode_disabled(&self, disabled: bool) -> Result<&Self> {
        self.configure(|options| options.loopback_mode_disabled = disabled)
    }

    /// Set `SO_RCVBUF`. Zero is rejected with `InvalidArgument`.
    pub fn set_receive_buffer_size(&self, size: usize) -> Result<&Self> {
        self.configure(|options| options.receive_buffer_size = Some(size))
    }

    /// Set `SO_SNDBUF`. Zero is rejected with `InvalidArgument`.
    pub fn set_send_buffer_size(&self, size: usize) -> Result<&Self> {
        self.configure(|options| options.send_buffer_size = Some(size))
    }

    pub fn set_reuse_address(&self, enabled: bool) -> Result<&Self> {
        self.configure(|options| options.reuse_address = enabled)
    }

    /// Set the multicast time-to-live, `0..=255`.
    pub fn set_time_to_live(&self, ttl: u32) -> Result<&Self> {
        self.configure(|options| options.time_to_live = Some(ttl))
    }

    /// Set the traffic class byte, `0..=255`.
    pub fn set_traffic_class(&self, class: u32) -> Result<&Self> {
        self.configure(|options| options.traffic_class = Some(class))
    }

    /// Select the outgoing multicast interface by one of its addresses.
    pub fn set_interface(&self, addr: IpAddr) -> Result<&Self> {
        self.configure(|options| {
            options.multicast_interface = Some(MulticastInterface::Address(addr));
        })
    }

    /// Select the outgoing multicast interface by name.
    ///
    /// # Errors
    ///
    /// [`DatagramError::NoSuchInterface`] if no interface has that name.
    pub fn set_network_interface(&self, name: &str) -> Result<&Self> {
        self.ensure_configurable()?;
        NetworkInterface::by_name(name)?;
        self.configure(|options| {
            options.multicast_interface = Some(MulticastInterface::Name(name.to_string()));
        })
    }

    fn configure(&self, update: impl FnOnce(&mut SocketOptions)) -> Result<&Self> {
        let mut options = self.core.options.lock();
        self.ensure_configurable()?;

        let mut updated = options.clone();
        update(&mut updated);
        updated.validate()?;
        *options = updated;
        Ok(self)
    }

    fn ensure_configurable(&self) -> Result<()> {
        match self.core.phase.get() {
            Phase::Configurable => Ok(()),
            phase => Err(DatagramError::illegal_state(format!(
                "socket options cannot change once the endpoint is {phase}"
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Send `data` to `host:port`.
    ///
    /// `host` may be a name or an address literal. Success means the OS
    /// accepted the datagram. Without a handler, failures go to the
    /// exception handler.
    pub fn send(
        &self,
        data: impl Into<Bytes>,
        host: &str,
        port: u16,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        let data = data.into();
        let host = host.to_string();
        // A send still pending when the endpoint closes fails with ClosedEndpoint.
        let completion = Completion::abortable(handler, self.clone(), self.core.clone());
        self.issue(completion, |completion| Command::Send {
            data,
            host,
            port,
            completion,
        })
    }

    /// Send `text` encoded as UTF-8.
    pub fn send_str(&self, text: &str, host: &str, port: u16, handler: Option<Handler<Self>>) -> &Self {
        self.send(Bytes::copy_from_slice(text.as_bytes()), host, port, handler)
    }

    /// Send `text` in the named encoding.
    ///
    /// Supports `UTF-8`, `US-ASCII`, and `ISO-8859-1` (and their common
    /// aliases), case-insensitively. An unsupported encoding, or a character
    /// the encoding cannot represent, fails with `InvalidArgument`.
    pub fn send_str_with_encoding(
        &self,
        text: &str,
        encoding: &str,
        host: &str,
        port: u16,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        match encode(text, encoding) {
            Ok(data) => self.send(data, host, port, handler),
            Err(error) => self.submit(handler, |completion| Command::Reject { error, completion }),
        }
    }

    /// Install the handler for unsolicited errors: read failures and panics
    /// escaping the data handler. Runs on the endpoint's context.
    pub fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(DatagramError) + Send + Sync + 'static,
    {
        self.core.set_exception_handler(Some(Arc::new(handler)));
        self
    }

    /// Remove the exception handler. Unsolicited errors are then reported to
    /// the context.
    pub fn clear_exception_handler(&self) -> &Self {
        self.core.set_exception_handler(None);
        self
    }

    /// Close the endpoint and release its socket.
    ///
    /// Only the first call tears the socket down and completes its handler;
    /// later calls do nothing. Operations still queued behind the close
    /// fail with `ClosedEndpoint`, as do sends whose handler has not run yet.
    /// Closing also drops the data and exception handlers.
    pub fn close(&self, handler: Option<Handler<()>>) {
        if self.core.phase.close() == Phase::Closed {
            tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, "endpoint already closed");
            return;
        }
        tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, "endpoint closing");

        let completion = Completion::new(handler, (), self.core.clone());
        // A send error hands the command back; dropping it reports ClosedEndpoint.
        let _ = self.commands.send(Command::Close { completion });
    }

    /// Issue an operation. The endpoint becomes active before anything is
    /// queued, even if the operation later fails.
    fn submit(&self, handler: Option<Handler<Self>>, command: impl FnOnce(Completion) -> Command) -> &Self {
        self.issue(Completion::new(handler, self.clone(), self.core.clone()), command)
    }

    fn issue(&self, completion: Completion, command: impl FnOnce(Completion) -> Command) -> &Self {
        if self.core.phase.activate() == Phase::Configurable {
            tracing::debug!(target: targets::ENDPOINT, endpoint = self.core.id, "endpoint active");
        }
        let _ = self.commands.send(command(completion));
        self
    }
}

impl Endpoint<Server> {
    /// Bind to `port` on the wildcard address.
    ///
    /// An endpoint created without a family binds the IPv4 wildcard.
    pub fn listen(&self, port: u16, handler: Option<Handler<Self>>) -> &Self {
        self.submit(handler, |completion| Command::Bind {
            target: BindTarget::Wildcard(port),
            completion,
        })
    }

    /// Bind to `host:port`, resolving `host` first.
    pub fn listen_on(&self, host: &str, port: u16, handler: Option<Handler<Self>>) -> &Self {
        let host = host.to_string();
        self.submit(handler, |completion| Command::Bind {
            target: BindTarget::Host(host, port),
            completion,
        })
    }

    /// Bind to `addr`.
    pub fn listen_addr(&self, addr: SocketAddr, handler: Option<Handler<Self>>) -> &Self {
        self.submit(handler, |completion| Command::Bind {
            target: BindTarget::Addr(addr),
            completion,
        })
    }

    /// Join the any-source multicast `group` on the default interface.
    pub fn join_group(&self, group: &str, handler: Option<Handler<Self>>) -> &Self {
        self.membership(MembershipOp::Join, group, None, None, handler)
    }

    /// Join `group` on `interface`, accepting datagrams from `source` only.
    pub fn join_source_group(
        &self,
        group: &str,
        interface: &str,
        source: &str,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        self.membership(MembershipOp::Join, group, Some(source), Some(interface), handler)
    }

    /// Leave an any-source `group`.
    pub fn leave_group(&self, group: &str, handler: Option<Handler<Self>>) -> &Self {
        self.membership(MembershipOp::Leave, group, None, None, handler)
    }

    /// Leave a source-specific membership.
    pub fn leave_source_group(
        &self,
        group: &str,
        interface: &str,
        source: &str,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        self.membership(MembershipOp::Leave, group, Some(source), Some(interface), handler)
    }

    /// Drop datagrams from `source` sent to `group`, without leaving it.
    pub fn block_source(&self, group: &str, source: &str, handler: Option<Handler<Self>>) -> &Self {
        self.membership(MembershipOp::Block, group, Some(source), None, handler)
    }

    /// Like [`block_source`](Self::block_source), scoped to `interface`.
    pub fn block_source_on(
        &self,
        group: &str,
        interface: &str,
        source: &str,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        self.membership(MembershipOp::Block, group, Some(source), Some(interface), handler)
    }

    fn membership(
        &self,
        op: MembershipOp,
        group: &str,
        source: Option<&str>,
        interface: Option<&str>,
        handler: Option<Handler<Self>>,
    ) -> &Self {
        let group = group.to_string();
        let source = source.map(str::to_string);
        let interface = interface.map(str::to_string);
        self.submit(handler, |completion| Command::Membership {
            op,
            group,
            source,
            interface,
            completion,
        })
    }

    /// Install the handler for inbound datagrams.
    ///
    /// The handler in place when a datagram is delivered is the one that
    /// sees it. Datagrams arriving with no handler installed are dropped.
    pub fn data_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(DatagramPacket) + Send + Sync + 'static,
    {
        self.core.set_data_handler(Some(Arc::new(handler)));
        self
    }

    /// Remove the data handler.
    pub fn clear_data_handler(&self) -> &Self {
        self.core.set_data_handler(None);
        self
    }
}

impl<R: Role> Clone for Endpoint<R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            commands: self.commands.clone(),
            _role: PhantomData,
        }
    }
}

impl<R: Role> std::fmt::Debug for Endpoint<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.core.id)
            .field("role", &R::NAME)
            .field("family", &self.core.family)
            .field("phase", &self.core.phase.get())
            .field("local_address", &self.core.local_address.get())
            .finish()
    }
}

/// Encode `text` in the named character set.
fn encode(text: &str, encoding: &str) -> Result<Bytes> {
    match encoding.to_ascii_uppercase().as_str() {
        "UTF-8" | "UTF8" => Ok(Bytes::copy_from_slice(text.as_bytes())),
        "US-ASCII" | "ASCII" => {
            if text.is_ascii() {
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            } else {
                Err(DatagramError::invalid_argument(
                    "text cannot be encoded as US-ASCII",
                ))
            }
        }
        "ISO-8859-1" | "LATIN1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect::<Option<Vec<u8>>>()
            .map(Bytes::from)
            .ok_or_else(|| DatagramError::invalid_argument("text cannot be encoded as ISO-8859-1")),
        _ => Err(DatagramError::invalid_argument(format!(
            "unsupported encoding: {encoding}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_encode_utf8() {
        assert_eq!(encode("héllo", "utf-8").unwrap().as_ref(), "héllo".as_bytes());
        assert_eq!(encode("abc", "UTF8").unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_encode_ascii() {
        assert_eq!(encode("abc", "US-ASCII").unwrap().as_ref(), b"abc");
        let err = encode("héllo", "ascii").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_encode_latin1() {
        assert_eq!(encode("é", "ISO-8859-1").unwrap().as_ref(), &[0xE9]);
        let err = encode("€", "latin1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_encode_unknown() {
        let err = encode("abc", "EBCDIC").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("EBCDIC"));
    }
}
