//! UDP endpoints with context-affine callbacks.
//!
//! - [`DatagramFactory`] creates [`DatagramClient`]s and [`DatagramServer`]s.
//! - Socket options live in [`SocketOptions`] and can only change while an
//!   endpoint is [`Phase::Configurable`].
//! - Asynchronous operations take an optional [`Handler`] that receives an
//!   [`AsyncResult`](crate::AsyncResult) exactly once, on the endpoint's
//!   context.
//!
//! # Multicast Example
//!
//! ```ignore
//! use quay_datagram::{DatagramFactory, ProtocolFamily, handler};
//!
//! let server = factory.create_server(Some(ProtocolFamily::Inet));
//! server.set_reuse_address(true)?;
//! server.data_handler(|packet| println!("{:?}", packet.data()));
//! server.listen(5000, handler(|result| {
//!     if let Ok(server) = result {
//!         server.join_group("239.255.0.1", None);
//!     }
//! }));
//! ```

mod completion;
mod dispatch;
mod driver;
mod endpoint;
mod factory;
mod options;
mod packet;
mod phase;
mod socket;
mod sys;

pub use completion::{Handler, handler};
pub use endpoint::{Client, DatagramClient, DatagramServer, Endpoint, Role, Server};
pub use factory::DatagramFactory;
pub use options::{MulticastInterface, ProtocolFamily, SocketOptions};
pub use packet::DatagramPacket;
pub use phase::Phase;
