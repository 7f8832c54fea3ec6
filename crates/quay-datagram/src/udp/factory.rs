//! Endpoint construction.

use std::sync::Arc;

use quay_core::{AsyncRuntime, Context};
use tokio::sync::mpsc;

use super::driver::Driver;
use super::endpoint::{Client, DatagramClient, DatagramServer, Endpoint, EndpointCore, Role, Server};
use super::options::ProtocolFamily;
use crate::dns::HostResolver;

/// Creates endpoints bound to one context.
///
/// Every endpoint gets its own driver task on the async runtime; all of its
/// callbacks run on the factory's context.
#[derive(Clone)]
pub struct DatagramFactory {
    context: Context,
    runtime: &'static AsyncRuntime,
    resolver: Arc<HostResolver>,
}

impl DatagramFactory {
    /// A factory using the global async runtime and the shared resolver.
    pub fn new(context: Context) -> Self {
        Self::with_runtime(context, AsyncRuntime::global())
    }

    /// A factory whose drivers run on `runtime`.
    pub fn with_runtime(context: Context, runtime: &'static AsyncRuntime) -> Self {
        Self {
            context,
            runtime,
            resolver: HostResolver::shared(),
        }
    }

    /// Use `resolver` for every endpoint created from now on.
    pub fn with_resolver(mut self, resolver: Arc<HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The context new endpoints are bound to.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Create a send-only endpoint. Its socket family follows the first
    /// destination it sends to.
    pub fn create_client(&self) -> DatagramClient {
        self.create::<Client>(None)
    }

    /// Create a server endpoint.
    ///
    /// A concrete `family` fixes the socket domain up front, which some
    /// platforms need for multicast. With `None` the family follows the
    /// first address the endpoint is used with.
    pub fn create_server(&self, family: Option<ProtocolFamily>) -> DatagramServer {
        self.create::<Server>(family)
    }

    fn create<R: Role>(&self, family: Option<ProtocolFamily>) -> Endpoint<R> {
        let core = Arc::new(EndpointCore::new(
            self.context.clone(),
            family,
            self.resolver.clone(),
        ));
        let (sender, receiver) = mpsc::unbounded_channel();

        let driver = Driver::new(core.clone(), receiver, R::RECEIVES);
        // The handle is not needed; the driver ends when the endpoint does.
        let _ = self.runtime.spawn(driver.run());

        Endpoint::new(core, sender)
    }
}

impl std::fmt::Debug for DatagramFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramFactory")
            .field("context", &self.context.id())
            .field("runtime", &self.runtime.runtime_type())
            .finish()
    }
}
