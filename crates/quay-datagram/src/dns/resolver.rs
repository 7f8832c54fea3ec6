//! Host name resolution for endpoint addresses.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use hickory_resolver::config::{ResolveHosts, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use quay_core::logging::targets;

use crate::error::{DatagramError, Result};
use crate::udp::ProtocolFamily;

/// How long a single name server query may take.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

static SHARED: OnceLock<Arc<HostResolver>> = OnceLock::new();

/// Resolves host names and address literals to IP addresses.
///
/// Literals (`"127.0.0.1"`, `"::1"`, `"[::1]"`) never touch the network.
/// Names go through a hickory resolver that honours the hosts file; the
/// resolver is built on first use.
///
/// # Example
///
/// ```ignore
/// use quay_datagram::dns::HostResolver;
///
/// let resolver = HostResolver::shared();
/// let addr = resolver.resolve("localhost", None).await?;
/// ```
pub struct HostResolver {
    resolver: OnceLock<TokioResolver>,
}

impl HostResolver {
    /// Create a resolver with its own cache.
    pub fn new() -> Self {
        Self {
            resolver: OnceLock::new(),
        }
    }

    /// The process-wide resolver shared by every endpoint.
    pub fn shared() -> Arc<HostResolver> {
        SHARED.get_or_init(|| Arc::new(HostResolver::new())).clone()
    }

    fn resolver(&self) -> &TokioResolver {
        self.resolver.get_or_init(|| {
            let mut opts = ResolverOpts::default();
            opts.use_hosts_file = ResolveHosts::Auto;
            opts.timeout = QUERY_TIMEOUT;
            opts.attempts = 1;

            Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
                .with_options(opts)
                .build()
        })
    }

    /// Resolve `host` to every address it maps to.
    ///
    /// Must be awaited inside the tokio runtime.
    pub async fn resolve_all(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Some(addr) = parse_literal(host) {
            return Ok(vec![addr]);
        }
        if host.is_empty() || is_reserved_invalid(host) {
            return Err(DatagramError::UnknownHost(host.to_string()));
        }

        let response = self.resolver().lookup_ip(host).await.map_err(|e| {
            tracing::debug!(target: targets::ENDPOINT, host, error = %e, "host resolution failed");
            DatagramError::UnknownHost(host.to_string())
        })?;

        let addresses: Vec<IpAddr> = response.iter().collect();
        if addresses.is_empty() {
            return Err(DatagramError::UnknownHost(host.to_string()));
        }
        Ok(addresses)
    }

    /// Resolve `host` to one address, preferring `family` when given.
    pub async fn resolve(&self, host: &str, family: Option<ProtocolFamily>) -> Result<IpAddr> {
        let addresses = self.resolve_all(host).await?;
        let preferred = family.and_then(|family| {
            addresses
                .iter()
                .copied()
                .find(|addr| ProtocolFamily::of(*addr) == family)
        });
        preferred
            .or_else(|| addresses.first().copied())
            .ok_or_else(|| DatagramError::UnknownHost(host.to_string()))
    }
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver")
            .field("initialized", &self.resolver.get().is_some())
            .finish()
    }
}

/// Parse an IPv4 or IPv6 literal, with or without brackets.
pub fn parse_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}

/// Names under the `invalid` TLD never resolve (RFC 6761).
fn is_reserved_invalid(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "invalid" || host.ends_with(".invalid")
}
