//! Network interface inventory.
//!
//! Multicast memberships can be scoped to a named interface. This module maps
//! platform interface names to their index and addresses.
//!
//! # Example
//!
//! ```no_run
//! use quay_datagram::network_info::NetworkInterface;
//!
//! for iface in NetworkInterface::list() {
//!     println!("{} (index {}): {:?}", iface.name, iface.index, iface.ipv4_addresses);
//! }
//! ```

mod interface;

pub use interface::{NetworkInterface, multicast_capable_v4};
