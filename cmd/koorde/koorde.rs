mod cli;
mod initializers;

use clap::Parser;
use cli::CLI;
use initializers::{
    bootstrap_backend, bootstrap_ring, init_node, init_tracing, shutdown, start_network,
    start_stabilizer,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Budget for one client operation, covering the whole lookup chain rather
/// than a single hop.
const REQUEST_BUDGET_HOPS: u32 = 4;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let CLI { opts } = CLI::parse();
    init_tracing(&opts);

    let http_addr = format!("{}:{}", opts.http_addr, opts.http_port);
    let config = opts.into_config()?;
    let node = init_node(&config)?;
    let cancel = CancellationToken::new();

    start_network(node.clone(), &config, cancel.clone()).await?;
    let backend = bootstrap_backend(&config);
    bootstrap_ring(&node, backend.as_ref()).await?;
    let stabilizer_cancel = CancellationToken::new();
    let _stabilizer = start_stabilizer(node.clone(), &config, stabilizer_cancel.clone());

    let request_budget: Duration = config.failure_timeout() * REQUEST_BUDGET_HOPS;
    let api_node = node.clone();
    tokio::spawn(async move {
        if let Err(err) = koorde_rpc::start_api(&http_addr, api_node, request_budget).await {
            error!(error = %err, "RPC server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    shutdown(node, backend.as_ref(), stabilizer_cancel, cancel).await;
    Ok(())
}
