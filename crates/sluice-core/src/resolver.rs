//! Host/service resolution contract consumed by the core (spec §4, row
//! M). The implementation is external — this crate only defines the
//! trait boundary the session/runtime layers code against, plus an
//! in-memory double useful for tests that need deterministic resolution
//! without touching the network or the OS resolver.
use std::collections::HashMap;

use crate::endpoint::Endpoint;
use crate::error::{Result, SocketError};

/// Resolves a `(host, service)` pair into zero or more candidate
/// endpoints, in the order the caller should try them.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, service: &str) -> Result<Vec<Endpoint>>;
}

/// A fixed host/service → endpoints table, for tests and for embedding
/// environments that already know their topology statically.
#[derive(Default)]
pub struct StaticResolver {
    entries: HashMap<(String, String), Vec<Endpoint>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        self.entries.insert((host.into(), service.into()), endpoints);
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, service: &str) -> Result<Vec<Endpoint>> {
        self.entries
            .get(&(host.to_owned(), service.to_owned()))
            .cloned()
            .ok_or(SocketError::Invalid("no static resolution entry for host/service"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn static_resolver_returns_registered_endpoints() {
        let mut resolver = StaticResolver::new();
        let ep = Endpoint::Ip4 { addr: Ipv4Addr::new(127, 0, 0, 1), port: 443 };
        resolver.insert("example.internal", "https", vec![ep.clone()]);
        assert_eq!(resolver.resolve("example.internal", "https").unwrap(), vec![ep]);
    }

    #[test]
    fn unknown_host_is_invalid() {
        let resolver = StaticResolver::new();
        assert!(matches!(resolver.resolve("nope", "http"), Err(SocketError::Invalid(_))));
    }
}
