use crate::cli::Options;
use koorde_common::Node;
use koorde_config::{BootstrapConfig, NodeConfig};
use koorde_p2p::{
    LocalNode, Stabilizer, StabilizerIntervals,
    discovery::{Bootstrap, DnsBootstrap, StaticBootstrap},
    wire::server,
};
use koorde_storage::Store;
use spawned_concurrency::tasks::GenServerHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init_tracing(opts: &Options) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy()
        .add_directive(
            format!("koorde={}", opts.log_level)
                .parse()
                .expect("valid directive"),
        );
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Builds the local node from the configuration: ring parameters,
/// identity, an empty store and the connection pool.
pub fn init_node(config: &NodeConfig) -> eyre::Result<LocalNode> {
    let space = config.space()?;
    let addr = config.advertised_addr()?;
    let id = config.node_id(&space)?;
    let node = Node::new(id, addr);
    info!(node = %node, bits = space.bits(), degree = space.degree(), "Node identity");
    Ok(LocalNode::new(
        node,
        space,
        Store::new(),
        config.failure_timeout(),
    ))
}

/// Binds the peer listener and starts serving inbound connections.
pub async fn start_network(
    node: LocalNode,
    config: &NodeConfig,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    server::serve(node, listener, cancel);
    Ok(())
}

pub fn start_stabilizer(
    node: LocalNode,
    config: &NodeConfig,
    cancel: CancellationToken,
) -> GenServerHandle<Stabilizer> {
    Stabilizer::spawn(
        node,
        StabilizerIntervals {
            stabilization: config.stabilization_interval(),
            debruijn_fix: config.debruijn_fix_interval(),
            storage_fix: config.storage_fix_interval(),
        },
        cancel,
    )
}

pub fn bootstrap_backend(config: &NodeConfig) -> Box<dyn Bootstrap> {
    match &config.bootstrap {
        BootstrapConfig::Static { peers } => Box::new(StaticBootstrap::new(peers.clone())),
        BootstrapConfig::Dns { host, port } => Box::new(DnsBootstrap::new(host.clone(), *port)),
    }
}

/// Discovers peers and joins the ring through the first reachable one; an
/// empty or unreachable peer set starts a fresh single-node ring.
pub async fn bootstrap_ring(node: &LocalNode, backend: &dyn Bootstrap) -> eyre::Result<()> {
    let peers = match backend.discover().await {
        Ok(peers) => peers,
        Err(err) => {
            warn!(error = %err, "Peer discovery failed, starting a new ring");
            Vec::new()
        }
    };
    for peer in peers {
        if peer == node.node().addr {
            continue;
        }
        match node.join(&peer).await {
            Ok(()) => {
                info!(bootstrap = %peer, "Joined ring");
                if let Err(err) = backend.register(node.node()).await {
                    warn!(error = %err, "Could not register with the discovery backend");
                }
                return Ok(());
            }
            Err(err) => warn!(bootstrap = %peer, error = %err, "Join attempt failed"),
        }
    }
    node.create();
    if let Err(err) = backend.register(node.node()).await {
        warn!(error = %err, "Could not register with the discovery backend");
    }
    Ok(())
}

/// Graceful shutdown: cancel the maintenance loops, announce departure and
/// hand off the stored resources, then tear the listener down.
pub async fn shutdown(
    node: LocalNode,
    backend: &dyn Bootstrap,
    stabilizer_cancel: CancellationToken,
    cancel: CancellationToken,
) {
    info!("Shutting down");
    stabilizer_cancel.cancel();
    if let Err(err) = backend.deregister(node.node()).await {
        warn!(error = %err, "Could not deregister from the discovery backend");
    }
    if let Err(err) = node.leave().await {
        warn!(error = %err, "Graceful leave failed");
    }
    cancel.cancel();
}
