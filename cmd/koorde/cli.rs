use clap::Parser as ClapParser;
use koorde_config::{BootstrapConfig, Mode, NodeConfig};
use std::path::PathBuf;
use tracing::Level;

#[derive(ClapParser)]
#[command(name = "koorde", author, version, about = "Koorde DHT node")]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE_PATH",
        help = "JSON configuration file; flags below override its values.",
        help_heading = "Node options",
        env = "KOORDE_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "node.bind",
        value_name = "ADDRESS",
        help = "Address the peer listener binds to.",
        help_heading = "Node options",
        env = "KOORDE_NODE_BIND"
    )]
    pub bind: Option<String>,
    #[arg(
        long = "node.port",
        value_name = "PORT",
        help = "Port for node-to-node traffic.",
        help_heading = "Node options",
        env = "KOORDE_NODE_PORT"
    )]
    pub port: Option<u16>,
    #[arg(
        long = "node.host",
        value_name = "HOST",
        help = "Host advertised to peers; required in public mode.",
        help_heading = "Node options",
        env = "KOORDE_NODE_HOST"
    )]
    pub host: Option<String>,
    #[arg(
        long = "node.id",
        value_name = "HEX_ID",
        help = "Pin the ring identifier instead of hashing the advertised address.",
        help_heading = "Node options",
        env = "KOORDE_NODE_ID"
    )]
    pub node_id: Option<String>,
    #[arg(
        long = "mode",
        value_name = "MODE",
        help = "Network mode: public or private.",
        value_parser = parse_mode,
        help_heading = "Node options",
        env = "KOORDE_MODE"
    )]
    pub mode: Option<Mode>,
    #[arg(
        long = "bootstrap.peers",
        value_name = "PEER_LIST",
        value_delimiter = ',',
        num_args = 1..,
        help = "Comma separated peer addresses to bootstrap from.",
        help_heading = "Bootstrap options",
        env = "KOORDE_BOOTSTRAP_PEERS"
    )]
    pub bootstrap_peers: Vec<String>,
    #[arg(
        long = "bootstrap.dns",
        value_name = "HOST:PORT",
        help = "DNS name resolving to the peer fleet, with the peer port.",
        help_heading = "Bootstrap options",
        env = "KOORDE_BOOTSTRAP_DNS"
    )]
    pub bootstrap_dns: Option<String>,
    #[arg(
        long = "http.addr",
        default_value = "0.0.0.0",
        value_name = "ADDRESS",
        help = "Listening address for the client RPC server.",
        help_heading = "RPC options",
        env = "KOORDE_HTTP_ADDR"
    )]
    pub http_addr: String,
    #[arg(
        long = "http.port",
        default_value = "7400",
        value_name = "PORT",
        help = "Listening port for the client RPC server.",
        help_heading = "RPC options",
        env = "KOORDE_HTTP_PORT"
    )]
    pub http_port: String,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Node options",
        env = "KOORDE_LOG_LEVEL"
    )]
    pub log_level: Level,
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    match value {
        "public" => Ok(Mode::Public),
        "private" => Ok(Mode::Private),
        other => Err(format!("unknown mode {other:?}, expected public or private")),
    }
}

impl Options {
    /// Loads the config file (when given) and layers the CLI overrides on
    /// top.
    pub fn into_config(self) -> eyre::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.node.bind = bind;
        }
        if let Some(port) = self.port {
            config.node.port = port;
        }
        if let Some(host) = self.host {
            config.node.host = Some(host);
        }
        if let Some(id) = self.node_id {
            config.node.id = Some(id);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap = BootstrapConfig::Static {
                peers: self.bootstrap_peers,
            };
        } else if let Some(dns) = self.bootstrap_dns {
            let (host, port) = dns
                .rsplit_once(':')
                .ok_or_else(|| eyre::eyre!("--bootstrap.dns expects HOST:PORT"))?;
            config.bootstrap = BootstrapConfig::Dns {
                host: host.to_string(),
                port: port.parse()?,
            };
        }
        Ok(config)
    }
}
