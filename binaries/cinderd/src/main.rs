#![doc = include_str!("../README.md")]

use std::sync::Arc;

use tokio::sync::mpsc;

use cinder_blockchain::BlockChain;

mod blockchain;
mod commands;
mod config;
mod constants;
mod logging;
mod node;
mod statics;
mod supervisor;

use config::Config;
use constants::{COMMAND_CHANNEL_SIZE, VERSION_BUILD};
use node::Node;
use supervisor::Supervisor;

fn main() -> anyhow::Result<()> {
    // Initialize global static `LazyLock` data.
    statics::init_lazylock_statics();

    let config = config::read_config_and_args();

    logging::init_logging(&config)?;
    tracing::info!("cinderd {VERSION_BUILD}");
    tracing::debug!("{config}");

    let chain = blockchain::open_chain(&config)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(config, chain))
}

async fn run(config: Config, chain: Arc<BlockChain>) -> anyhow::Result<()> {
    let supervisor = Supervisor::new();
    supervisor.spawn_signal_handler();

    let node = Node::start(&config, chain, &supervisor).await?;
    tracing::info!(network = %config.network(), mode = %config.sync_mode, "node started");

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    std::thread::spawn(|| commands::command_listener(command_tx));
    commands::io_loop(command_rx, &node, &supervisor).await;

    // Without a stdin the node runs until a signal.
    supervisor.cancelled().await;

    node.shutdown().await;
    supervisor.wait().await;

    tracing::info!("shut down");
    Ok(())
}
