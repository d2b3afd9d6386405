//! The running node; `struct Node`.
//!
//! This is the surface an API layer drives: [`Node::sync_status`], [`Node::subscribe`] and
//! [`Node::cancel`].
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use cinder_blockchain::BlockChain;
use cinder_chain_indexer::{BloomIndexer, ChainIndexer, ChtIndexer, SectionStatus};
use cinder_light::OnDemandRetriever;
use cinder_p2p::{initialize_network, NetworkInterface};
use cinder_types::{ChainEvent, EventKind, SyncMode, SyncStatus};

use crate::{config::Config, supervisor::Supervisor};

/// Chain events of one [`EventKind`].
pub struct EventSubscription {
    kind: EventKind,
    events: broadcast::Receiver<ChainEvent>,
}

impl EventSubscription {
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the next event of this subscription's kind.
    ///
    /// # Errors
    /// Returns [`RecvError::Lagged`] if events were missed, and [`RecvError::Closed`]
    /// once the chain is gone.
    pub async fn recv(&mut self) -> Result<ChainEvent, RecvError> {
        loop {
            let event = self.events.recv().await?;
            if event.kind() == self.kind {
                return Ok(event);
            }
        }
    }
}

/// A running node.
pub struct Node {
    chain: Arc<BlockChain>,
    network: NetworkInterface,
    bloom: ChainIndexer<BloomIndexer>,
    cht: ChainIndexer<ChtIndexer>,
    /// Only in [`SyncMode::Light`].
    odr: Option<OnDemandRetriever>,
}

impl Node {
    /// Starts the network and the chain indexers on `supervisor`.
    ///
    /// # Errors
    /// Fails if the network could not be started or the indexes could not be opened.
    pub async fn start(
        config: &Config,
        chain: Arc<BlockChain>,
        supervisor: &Supervisor,
    ) -> anyhow::Result<Self> {
        let network = initialize_network(
            Arc::clone(&chain),
            config.network().network_id(),
            config.p2p_config(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start the network: {e}"))?;

        if let Some(addr) = network.local_addr() {
            tracing::info!("accepting connections on {addr}");
        }

        let bloom = ChainIndexer::new(
            Arc::clone(&chain),
            BloomIndexer::new(),
            config.bloom_indexer_config(),
        )?;
        let cht = ChainIndexer::new(
            Arc::clone(&chain),
            ChtIndexer::new(),
            config.cht_indexer_config(),
        )?;
        supervisor.spawn(bloom.clone().run());
        supervisor.spawn(cht.clone().run());

        let odr = match chain.mode() {
            SyncMode::Light => Some(OnDemandRetriever::new(
                Arc::clone(&chain),
                network.retriever().clone(),
                config.odr_config(),
            )),
            SyncMode::Full | SyncMode::Fast => None,
        };

        Ok(Self {
            chain,
            network,
            bloom,
            cht,
            odr,
        })
    }

    pub const fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    pub const fn network(&self) -> &NetworkInterface {
        &self.network
    }

    /// The on-demand retriever, [`None`] unless the node is light.
    pub const fn odr(&self) -> Option<&OnDemandRetriever> {
        self.odr.as_ref()
    }

    /// The bloom and CHT section progress.
    pub fn index_status(&self) -> (SectionStatus, SectionStatus) {
        (self.bloom.status(), self.cht.status())
    }

    /// Where the current or last sync started, where it is and where it is going.
    pub fn sync_status(&self) -> SyncStatus {
        self.network.downloader().progress()
    }

    /// Subscribes to chain events of `kind`.
    pub fn subscribe(&self, kind: EventKind) -> EventSubscription {
        EventSubscription {
            kind,
            events: self.chain.subscribe(),
        }
    }

    /// Cancels a running sync, returns `false` if there was none.
    pub fn cancel(&self) -> bool {
        let syncing = self.network.downloader().is_syncing();
        self.network.downloader().cancel();
        syncing
    }

    /// Cancels a running sync and saves the server pool.
    pub async fn shutdown(&self) {
        if let Err(e) = self.network.shutdown().await {
            tracing::warn!("failed to save the server pool: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use cinder_test_utils::chain::{test_genesis, ChainBuilder};

    use super::*;

    fn config(mode: SyncMode) -> Config {
        let mut config = Config {
            sync_mode: mode,
            ..Default::default()
        };
        config.p2p.p2p_port = 0;
        config.storage.indexer.bloom_section_size = 4;
        config.storage.indexer.bloom_confirmations = 0;
        config
    }

    #[tokio::test]
    async fn subscriptions_only_see_their_kind() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(3);
        let chain = builder.open_chain(SyncMode::Light);

        let supervisor = Supervisor::new();
        let node = Node::start(&config(SyncMode::Light), Arc::clone(&chain), &supervisor)
            .await
            .unwrap();
        assert!(node.odr().is_some());

        let mut heads = node.subscribe(EventKind::ChainHead);
        let mut logs = node.subscribe(EventKind::Logs);
        builder.import_into(&chain, 3).await;

        let ChainEvent::ChainHead { header } = heads.recv().await.unwrap() else {
            panic!("subscription returned another kind");
        };
        assert!(header.number >= 1);

        // Light chains execute nothing, so there are no logs.
        assert!(tokio::time::timeout(Duration::from_millis(100), logs.recv())
            .await
            .is_err());

        supervisor.trigger_shutdown();
        supervisor.wait().await;
    }

    #[tokio::test]
    async fn idle_node_reports_its_height() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(9);
        let chain = builder.build().await;

        let supervisor = Supervisor::new();
        let node = Node::start(&config(SyncMode::Full), chain, &supervisor)
            .await
            .unwrap();
        assert!(node.odr().is_none());

        assert_eq!(node.sync_status().current_height, 9);
        assert!(!node.cancel());

        // 0..=7 are confirmed bloom sections of 4.
        let mut bloom = node.bloom.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            bloom.wait_for(|status| status.sections == 2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(node.index_status().0.indexed_through, Some(7));

        node.shutdown().await;
        supervisor.trigger_shutdown();
        supervisor.wait().await;
    }
}
