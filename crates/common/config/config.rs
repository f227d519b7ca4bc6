//! Typed node configuration, loadable from a JSON file with CLI overrides
//! applied on top.

use koorde_common::{Id, Space, SpaceError};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Whether the node advertises an address reachable from outside its own
/// network. `public` requires an explicit host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Public,
    #[default]
    Private,
}

/// Bootstrap backend selection, tagged by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BootstrapConfig {
    /// Fixed list of peer addresses.
    Static {
        #[serde(default)]
        peers: Vec<String>,
    },
    /// One DNS name resolving to the peer fleet.
    Dns { host: String, port: u16 },
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig::Static { peers: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeIdentity {
    /// Ring identifier in hex; when absent the id is the hash of the
    /// advertised address.
    pub id: Option<String>,
    pub bind: String,
    /// Advertised host; defaults to the bind address in private mode.
    pub host: Option<String>,
    pub port: u16,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: None,
            bind: "0.0.0.0".to_string(),
            host: None,
            port: 4400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id_bits: u32,
    pub degree: u32,
    pub successor_list_size: usize,
    pub mode: Mode,
    pub stabilization_interval_ms: u64,
    pub debruijn_fix_interval_ms: u64,
    pub storage_fix_interval_ms: u64,
    pub failure_timeout_ms: u64,
    pub node: NodeIdentity,
    pub bootstrap: BootstrapConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id_bits: 160,
            degree: 16,
            successor_list_size: 16,
            mode: Mode::default(),
            stabilization_interval_ms: 2_000,
            debruijn_fix_interval_ms: 4_000,
            storage_fix_interval_ms: 10_000,
            failure_timeout_ms: 1_000,
            node: NodeIdentity::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Builds the identifier space, validating the ring parameters.
    pub fn space(&self) -> Result<Space, ConfigError> {
        Ok(Space::new(
            self.id_bits,
            self.degree,
            self.successor_list_size,
        )?)
    }

    /// The address peers dial: `host:port`, falling back to the bind
    /// address in private mode.
    pub fn advertised_addr(&self) -> Result<String, ConfigError> {
        let host = match (&self.node.host, self.mode) {
            (Some(host), _) => host.clone(),
            (None, Mode::Private) => self.node.bind.clone(),
            (None, Mode::Public) => {
                return Err(ConfigError::Invalid(
                    "public mode requires an advertised host".to_string(),
                ));
            }
        };
        if host.is_empty() {
            return Err(ConfigError::Invalid("empty advertised host".to_string()));
        }
        Ok(format!("{host}:{}", self.node.port))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.node.bind, self.node.port)
    }

    /// The node's ring identifier: the pinned hex id when configured,
    /// otherwise the hash of the advertised address.
    pub fn node_id(&self, space: &Space) -> Result<Id, ConfigError> {
        match &self.node.id {
            Some(hex) => Ok(space.id_from_hex(hex)?),
            None => Ok(space.id_from_key(&self.advertised_addr()?)),
        }
    }

    pub fn failure_timeout(&self) -> Duration {
        Duration::from_millis(self.failure_timeout_ms)
    }

    pub fn stabilization_interval(&self) -> Duration {
        Duration::from_millis(self.stabilization_interval_ms)
    }

    pub fn debruijn_fix_interval(&self) -> Duration {
        Duration::from_millis(self.debruijn_fix_interval_ms)
    }

    pub fn storage_fix_interval(&self) -> Duration {
        Duration::from_millis(self.storage_fix_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_valid_space() {
        let config = NodeConfig::default();
        let space = config.space().unwrap();
        assert_eq!(space.bits(), 160);
        assert_eq!(space.degree(), 16);
        assert_eq!(config.advertised_addr().unwrap(), "0.0.0.0:4400");
    }

    #[test]
    fn public_mode_requires_a_host() {
        let config = NodeConfig {
            mode: Mode::Public,
            ..Default::default()
        };
        assert!(config.advertised_addr().is_err());

        let with_host = NodeConfig {
            mode: Mode::Public,
            node: NodeIdentity {
                host: Some("dht-0.example.com".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            with_host.advertised_addr().unwrap(),
            "dht-0.example.com:4400"
        );
    }

    #[test]
    fn node_id_prefers_the_pinned_hex() {
        let config = NodeConfig {
            id_bits: 8,
            degree: 2,
            successor_list_size: 2,
            node: NodeIdentity {
                id: Some("7f".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let space = config.space().unwrap();
        assert_eq!(config.node_id(&space).unwrap().to_hex(), "7f");

        let derived = NodeConfig {
            id_bits: 8,
            degree: 2,
            successor_list_size: 2,
            ..Default::default()
        };
        let id = derived.node_id(&space).unwrap();
        assert!(space.is_valid(id.as_bytes()));
    }

    #[test]
    fn parses_a_config_document() {
        let raw = serde_json::json!({
            "id_bits": 64,
            "degree": 4,
            "successor_list_size": 8,
            "failure_timeout_ms": 500,
            "node": { "bind": "127.0.0.1", "port": 4500 },
            "bootstrap": { "mode": "static", "peers": ["10.0.0.1:4500"] }
        });
        let config: NodeConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.id_bits, 64);
        assert_eq!(config.failure_timeout(), Duration::from_millis(500));
        assert_eq!(config.bind_addr(), "127.0.0.1:4500");
        match config.bootstrap {
            BootstrapConfig::Static { ref peers } => {
                assert_eq!(peers, &["10.0.0.1:4500".to_string()])
            }
            _ => panic!("expected static bootstrap"),
        }

        let dns = serde_json::json!({ "bootstrap": { "mode": "dns", "host": "dht.svc", "port": 4400 } });
        let config: NodeConfig = serde_json::from_value(dns).unwrap();
        assert!(matches!(config.bootstrap, BootstrapConfig::Dns { .. }));
    }
}
