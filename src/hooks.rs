//! Extension seams for collaborators this crate never implements itself:
//! TLS termination and service-name resolution.
//!
//! Grounded in `original_source/ssl/SSLManager.h` (wrap/unwrap a stream
//! around the handshake) and `original_source/protobuf_rpc/name_service_protocol`
//! (`ServiceStub::SetUrlList` always works even when no name server is
//! configured). Both traits exist so the transport and RPC layers have a
//! documented plug point; neither ships a real implementation.

use crate::endpoint::Endpoint;
use crate::net::Connection;
use crate::reactor::ReactorHandle;

/// Wraps a freshly established [`Connection`] with TLS semantics before it
/// is handed to application callbacks. The default [`NoTls`] hook is a
/// pass-through: the raw connection is returned unchanged.
pub trait TlsHook: Send + Sync {
    fn wrap_server(&self, conn: Connection, handle: &ReactorHandle) -> Connection;
    fn wrap_client(&self, conn: Connection, handle: &ReactorHandle) -> Connection;
}

/// No-op [`TlsHook`]: connections pass through unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTls;

impl TlsHook for NoTls {
    fn wrap_server(&self, conn: Connection, _handle: &ReactorHandle) -> Connection {
        conn
    }

    fn wrap_client(&self, conn: Connection, _handle: &ReactorHandle) -> Connection {
        conn
    }
}

/// Resolves a logical service name to one or more candidate endpoints, the
/// seam a real name-service client would sit behind.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, service_name: &str) -> Vec<Endpoint>;
}

/// Resolves every name to a fixed, pre-configured list of endpoints — the
/// "hard-coded URL list" path that remains available even when a name
/// server is configured (mirrors `ServiceStub::SetUrlList`).
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> StaticResolver {
        StaticResolver { endpoints }
    }
}

impl NameResolver for StaticResolver {
    fn resolve(&self, _service_name: &str) -> Vec<Endpoint> {
        self.endpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Protocol;

    #[test]
    fn static_resolver_ignores_the_name_and_returns_its_fixed_list() {
        let endpoints = vec![Endpoint::new(Protocol::Tcp, "10.0.0.1".into(), 9000)];
        let resolver = StaticResolver::new(endpoints.clone());
        assert_eq!(resolver.resolve("anything"), endpoints);
        assert_eq!(resolver.resolve("anything-else"), endpoints);
    }
}
