//! # Cinder P2P
//!
//! Cinder's sync and on-demand retrieval, built on the connections from [`cinder_p2p_core`].
//!
//! - The [`PeerSet`] tracks connected peers.
//! - The [`RequestDistributor`] assigns requests to peers, ranked by the [`ServerPool`]'s
//!   reputation scores.
//! - The [`RetrieveManager`] sends a request until a peer answers it correctly.
//! - The [`Downloader`] syncs the chain with a heavier peer, the [`Fetcher`] follows
//!   announced blocks near our head.
//!
//! [`initialize_network`] wires these together with the tasks that make and accept
//! connections and returns a [`NetworkInterface`].
use std::{net::SocketAddr, sync::Arc};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinSet, time::interval};
use tracing::{instrument, Instrument, Span};

use cinder_blockchain::BlockChain;
use cinder_database::DbResult;
use cinder_helper::asynch::rayon_spawn_async;
use cinder_p2p_core::{
    client::{Handshaker, OurNodeInfo},
    transports::TcpInboundListener,
    Announcement, PeerAnnouncement,
};
use cinder_types::SyncMode;
use cinder_wire::{PeerCapabilities, ProtocolVersion};

mod broadcast;
pub mod config;
mod connection_maintainer;
pub mod constants;
pub mod distributor;
pub mod downloader;
pub mod fetcher;
mod inbound_server;
pub mod peer_set;
pub mod request_handler;
pub mod retrieve;
pub mod server_pool;
mod syncer;

pub use config::{
    DistributorConfig, DownloaderConfig, FetcherConfig, P2PConfig, RetrieveConfig,
    ServerPoolConfig,
};
pub use distributor::{RequestCriteria, RequestDistributor};
pub use downloader::{Downloader, DownloaderState, DownloaderStats, SyncError, SyncTarget};
pub use fetcher::{Fetcher, FetcherHandle, FetcherStats};
pub use peer_set::{PeerEntry, PeerSet, PeerSetError};
pub use request_handler::{ChainHeadSvc, ChainRequestHandler};
pub use retrieve::{
    InvalidResponse, RetrieveError, RetrieveManager, RetrieveRequest, RetrieveStats, Retrieved,
};
pub use server_pool::{Outcome, ServerPool};

use crate::constants::{
    ANNOUNCEMENT_CHANNEL_SIZE, SERVER_POOL_SAVE_INTERVAL, SYNC_TARGET_CHANNEL_SIZE,
};

/// Initializes the P2P [`NetworkInterface`] for `chain`.
///
/// This function starts all the tasks to maintain/accept/make connections, keep the chain
/// synced and keep the server pool saved.
///
/// # Errors
/// Fails if the server pool can not be read, the downloader's mode does not match the
/// chain's, or the listen address can not be bound.
#[instrument(level = "debug", name = "net", skip_all, fields(network_id = network_id))]
pub async fn initialize_network(
    chain: Arc<BlockChain>,
    network_id: u64,
    config: P2PConfig,
) -> Result<NetworkInterface, tower::BoxError> {
    let peer_set = PeerSet::new();
    let server_pool = Arc::new(ServerPool::load(
        config.server_pool,
        Arc::clone(chain.store()),
    )?);

    let distributor = RequestDistributor::new(
        Arc::clone(&peer_set),
        Arc::clone(&server_pool),
        config.distributor,
    );
    let retriever = RetrieveManager::new(distributor, config.retrieve);
    let downloader = Downloader::new(
        Arc::clone(&chain),
        retriever.clone(),
        config.downloader,
    )?;

    let (sync_tx, sync_rx) = mpsc::channel(SYNC_TARGET_CHANNEL_SIZE);
    let (fetcher, fetcher_handle) = Fetcher::new(
        Arc::clone(&chain),
        retriever.clone(),
        config.fetcher,
        sync_tx,
    );

    let capabilities = match chain.mode() {
        SyncMode::Light => PeerCapabilities::empty(),
        SyncMode::Full | SyncMode::Fast => {
            PeerCapabilities::FULL_SERVER | PeerCapabilities::LIGHT_SERVER
        }
    };

    let (announcement_tx, announcement_rx) = mpsc::channel(ANNOUNCEMENT_CHANNEL_SIZE);
    let handshaker = Handshaker::new(
        OurNodeInfo {
            network_id,
            genesis: chain.genesis_hash(),
            version: ProtocolVersion::LATEST,
            capabilities,
        },
        ChainHeadSvc(Arc::clone(&chain)),
        ChainRequestHandler::new(Arc::clone(&chain)),
        announcement_tx,
    );

    let listener = match config.listen_addr {
        Some(addr) => Some(TcpInboundListener::bind(addr).await?),
        None => None,
    };
    let local_addr = listener
        .as_ref()
        .map(TcpInboundListener::local_addr)
        .transpose()?;

    let mut background_tasks = JoinSet::new();

    background_tasks.spawn(fetcher.run().instrument(Span::current()));
    background_tasks.spawn(
        route_announcements(announcement_rx, fetcher_handle.clone())
            .instrument(Span::current()),
    );
    background_tasks.spawn(
        syncer::syncer(downloader.clone(), sync_rx, config.sync_check_interval)
            .instrument(Span::current()),
    );
    background_tasks.spawn(
        broadcast::broadcast_heads(Arc::clone(&chain), Arc::clone(&peer_set))
            .instrument(Span::current()),
    );
    background_tasks.spawn(
        save_server_pool(Arc::clone(&server_pool)).instrument(Span::current()),
    );
    background_tasks.spawn(
        connection_maintainer::OutboundConnectionKeeper::new(
            &config,
            handshaker.clone(),
            Arc::clone(&peer_set),
            Arc::clone(&server_pool),
        )
        .run()
        .instrument(Span::current()),
    );

    if let Some(listener) = listener {
        background_tasks.spawn(
            inbound_server::inbound_server(
                listener,
                handshaker,
                Arc::clone(&peer_set),
                Arc::clone(&server_pool),
                config.max_inbound_connections,
            )
            .map(|()| tracing::info!("Inbound connection listener shutdown"))
            .instrument(Span::current()),
        );
    }

    Ok(NetworkInterface {
        peer_set,
        server_pool,
        retriever,
        downloader,
        fetcher: fetcher_handle,
        local_addr,
        _background_tasks: Arc::new(background_tasks),
    })
}

/// Hands the announcements every connection receives to the fetcher.
async fn route_announcements(mut rx: mpsc::Receiver<PeerAnnouncement>, fetcher: FetcherHandle) {
    while let Some(PeerAnnouncement { peer, announcement }) = rx.recv().await {
        match announcement {
            Announcement::Hashes(hashes) => {
                for hash in hashes {
                    fetcher.notify(peer, hash);
                }
            }
            Announcement::Block(block) => fetcher.enqueue(peer, block),
        }
    }
}

/// Writes the server pool to disk every [`SERVER_POOL_SAVE_INTERVAL`].
async fn save_server_pool(server_pool: Arc<ServerPool>) {
    let mut save_interval = interval(SERVER_POOL_SAVE_INTERVAL);
    save_interval.reset();

    loop {
        save_interval.tick().await;

        let server_pool = Arc::clone(&server_pool);
        if let Err(e) = rayon_spawn_async(move || server_pool.save()).await {
            tracing::warn!("Failed to save the server pool: {e}");
        }
    }
}

/// The interface to the P2P network.
///
/// Dropping every clone stops the network's tasks.
#[derive(Clone)]
pub struct NetworkInterface {
    peer_set: Arc<PeerSet>,
    server_pool: Arc<ServerPool>,
    retriever: RetrieveManager,
    downloader: Downloader,
    fetcher: FetcherHandle,
    /// The address inbound connections are accepted on.
    local_addr: Option<SocketAddr>,
    /// Background tasks that will be aborted when this interface is dropped.
    _background_tasks: Arc<JoinSet<()>>,
}

impl NetworkInterface {
    pub const fn peer_set(&self) -> &Arc<PeerSet> {
        &self.peer_set
    }

    pub const fn server_pool(&self) -> &Arc<ServerPool> {
        &self.server_pool
    }

    /// The [`RetrieveManager`] on-demand requests go through.
    pub const fn retriever(&self) -> &RetrieveManager {
        &self.retriever
    }

    pub const fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub const fn fetcher(&self) -> &FetcherHandle {
        &self.fetcher
    }

    /// The address we accept connections on, [`None`] if we do not listen.
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Cancels a running sync and writes the server pool to disk.
    ///
    /// # Errors
    /// Fails if the server pool could not be written.
    pub async fn shutdown(&self) -> DbResult<()> {
        self.downloader.cancel();

        let server_pool = Arc::clone(&self.server_pool);
        rayon_spawn_async(move || server_pool.save()).await
    }
}
