//! UDP endpoints for quay.
//!
//! This crate provides one abstraction for both sides of datagram traffic:
//!
//! - **Clients**: send datagrams to any host
//! - **Servers**: additionally bind, join multicast groups (any-source and
//!   source-specific), block sources, and receive datagrams
//!
//! Every callback of an endpoint (completions, inbound datagrams, errors)
//! runs on the single [`Context`](quay_core::Context) the endpoint was
//! created for. Socket I/O runs on the tokio runtime behind
//! [`AsyncRuntime`](quay_core::AsyncRuntime).
//!
//! # Lifecycle
//!
//! Endpoints start [`Phase::Configurable`]. The first send, listen, join,
//! leave, or block makes them [`Phase::Active`], and socket options can no
//! longer change. [`Endpoint::close`] moves them to [`Phase::Closed`];
//! anything issued afterwards fails with [`DatagramError::ClosedEndpoint`].
//!
//! # Example
//!
//! ```no_run
//! use quay_core::EventLoop;
//! use quay_datagram::{DatagramFactory, handler};
//!
//! let event_loop = EventLoop::new("udp");
//! let factory = DatagramFactory::new(event_loop.context().clone());
//!
//! let server = factory.create_server(None);
//! server.data_handler(|packet| {
//!     println!("{} bytes from {}", packet.len(), packet.sender());
//! });
//! server.listen_on("127.0.0.1", 1234, handler(|result| {
//!     if let Err(e) = result {
//!         eprintln!("listen failed: {e}");
//!     }
//! }));
//!
//! let client = factory.create_client();
//! client.send_str("hello", "127.0.0.1", 1234, None);
//! ```
//!
//! # Errors
//!
//! Option setters fail synchronously with [`DatagramError::IllegalState`]
//! once the endpoint is active. Everything else is reported through the
//! operation's [`Handler`], or to the endpoint's exception handler when the
//! operation was issued without one.

pub mod dns;
mod error;
pub mod network_info;
pub mod udp;

pub use error::{AsyncResult, DatagramError, ErrorKind, Result};

// Re-export commonly used types at the crate root
pub use udp::{
    Client, DatagramClient, DatagramFactory, DatagramPacket, DatagramServer, Endpoint, Handler,
    MulticastInterface, Phase, ProtocolFamily, Role, Server, SocketOptions, handler,
};
