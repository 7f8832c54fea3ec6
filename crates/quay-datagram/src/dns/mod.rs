//! Host name resolution.
//!
//! Every host given to an endpoint (send destinations, listen addresses,
//! multicast groups and sources) goes through [`HostResolver`]. Failures
//! surface as [`DatagramError::UnknownHost`](crate::DatagramError::UnknownHost).

mod resolver;

pub use resolver::{HostResolver, parse_literal};
