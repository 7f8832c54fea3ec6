//! Delivery of inbound datagrams to the data handler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use quay_core::logging::targets;
use quay_core::panic_message;

use super::endpoint::EndpointCore;
use super::packet::DatagramPacket;
use crate::error::DatagramError;

/// Queue one delivery of `packet` on the endpoint's context.
pub(crate) fn dispatch(core: &Arc<EndpointCore>, packet: DatagramPacket) {
    tracing::trace!(
        target: targets::DISPATCH,
        endpoint = core.id,
        sender = %packet.sender(),
        len = packet.len(),
        "datagram received"
    );
    let task_core = core.clone();
    core.post(move || deliver(&task_core, packet));
}

/// Runs on the context. The handler is read here, not when the datagram
/// arrived, so a replaced handler sees every later packet.
fn deliver(core: &EndpointCore, packet: DatagramPacket) {
    if core.phase.is_closed() {
        return;
    }
    let Some(handler) = core.data_handler() else {
        tracing::trace!(target: targets::DISPATCH, endpoint = core.id, "no data handler, datagram dropped");
        return;
    };

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(packet))) {
        core.unsolicited(DatagramError::Handler(panic_message(payload.as_ref())));
    }
}
