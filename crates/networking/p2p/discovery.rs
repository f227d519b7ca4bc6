//! Bootstrap peer discovery.
//!
//! The node only consumes the [`Bootstrap`] capability; concrete backends
//! (a static peer list, a DNS name resolving to the fleet) live behind it.
//! Registration hooks are optional and default to no-ops.

use async_trait::async_trait;
use koorde_common::Node;
use std::fmt::Debug;
use tokio::net::lookup_host;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("dns resolution failed for {name}: {reason}")]
    Resolution { name: String, reason: String },
}

#[async_trait]
pub trait Bootstrap: Send + Sync + Debug {
    /// Addresses of candidate peers already in the ring. An empty result
    /// means this node starts a ring of its own.
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError>;

    async fn register(&self, _node: &Node) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn deregister(&self, _node: &Node) -> Result<(), DiscoveryError> {
        Ok(())
    }
}

/// Fixed peer list from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticBootstrap {
    peers: Vec<String>,
}

impl StaticBootstrap {
    pub fn new(peers: Vec<String>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl Bootstrap for StaticBootstrap {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.peers.clone())
    }
}

/// Resolves one DNS name (e.g. a headless service) to the peer fleet; every
/// resolved address is assumed to answer on `port`.
#[derive(Debug, Clone)]
pub struct DnsBootstrap {
    host: String,
    port: u16,
}

impl DnsBootstrap {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

#[async_trait]
impl Bootstrap for DnsBootstrap {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let addrs = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|err| DiscoveryError::Resolution {
                name: self.host.clone(),
                reason: err.to_string(),
            })?
            .map(|addr| addr.to_string())
            .collect::<Vec<_>>();
        debug!(host = %self.host, count = addrs.len(), "Resolved bootstrap peers");
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_backend_returns_configured_peers() {
        let backend = StaticBootstrap::new(vec!["10.0.0.1:4400".to_string()]);
        assert_eq!(backend.discover().await.unwrap(), vec!["10.0.0.1:4400"]);
        let empty = StaticBootstrap::default();
        assert!(empty.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dns_backend_resolves_localhost() {
        let backend = DnsBootstrap::new("localhost".to_string(), 4400);
        let peers = backend.discover().await.unwrap();
        assert!(!peers.is_empty());
        assert!(peers.iter().all(|p| p.ends_with(":4400")));
    }
}
