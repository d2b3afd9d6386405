//! Opening the local chain.
use std::sync::Arc;

use anyhow::Context;

use cinder_blockchain::{BlockChain, Genesis, KvExecutor};
use cinder_database::RedbStore;
use cinder_helper::network::Network;

use crate::{config::Config, constants::DATABASE_CORRUPT_MSG};

/// The genesis block of `network`.
pub fn genesis(network: Network) -> Genesis {
    let (timestamp, difficulty, extra) = match network {
        Network::Mainnet => (1_735_689_600, 1 << 16, &b"cinder mainnet"[..]),
        Network::Testnet => (1_735_689_601, 1 << 8, &b"cinder testnet"[..]),
        Network::Devnet => (0, 1, &b"cinder devnet"[..]),
    };

    Genesis {
        timestamp,
        difficulty,
        extra: extra.to_vec(),
        alloc: Default::default(),
    }
}

/// Opens the chain database of the configured network, writing the genesis block if it is new.
///
/// # Errors
/// Fails if the database can not be opened, or holds another network's chain.
pub fn open_chain(config: &Config) -> anyhow::Result<Arc<BlockChain>> {
    let store = RedbStore::open(config.database_config()).context(DATABASE_CORRUPT_MSG)?;
    let engine = config.consensus_engine()?;

    let chain = BlockChain::open(
        Arc::new(store),
        &genesis(config.network()),
        Arc::new(engine),
        Arc::new(KvExecutor),
        config.sync_mode,
    )
    .with_context(|| format!("Failed to open the {} chain", config.network()))?;

    tracing::info!(
        network = %config.network(),
        mode = %config.sync_mode,
        head = chain.head_header()?.number,
        "opened chain"
    );

    Ok(Arc::new(chain))
}
