//! Logging facilities for quay.
//!
//! quay uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("quay_datagram=debug,quay_core=info")
//!     .init();
//! ```
//!
//! Every event is emitted under one of the targets in [`targets`], so each
//! subsystem can be filtered on its own.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Event-loop contexts: loop start/stop, unhandled exceptions.
    pub const CONTEXT: &str = "quay_core::context";
    /// Timer arming and firing.
    pub const TIMER: &str = "quay_core::timer";
    /// The tokio bridge.
    pub const RUNTIME: &str = "quay_core::runtime";
    /// Endpoint lifecycle: phase changes, bind, close.
    pub const ENDPOINT: &str = "quay_datagram::endpoint";
    /// Socket creation and option application.
    pub const SOCKET: &str = "quay_datagram::socket";
    /// Group membership and source filtering.
    pub const MULTICAST: &str = "quay_datagram::multicast";
    /// Inbound datagram delivery.
    pub const DISPATCH: &str = "quay_datagram::dispatch";
}

/// A guard that keeps a tracing span entered until it is dropped.
///
/// Useful for tracking the duration of an operation.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enter a new performance span named `name`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::debug_span!(target: "quay::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}
