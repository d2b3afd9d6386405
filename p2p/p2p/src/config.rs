//! Configuration for the sync and retrieval services.
//!
//! Every struct here has a [`Default`] with the values in [`constants`](crate::constants).
use std::{net::SocketAddr, time::Duration};

use cinder_types::SyncMode;

use crate::constants::*;

/// Request retry and timeout policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetrieveConfig {
    /// The amount of retries after the first attempt, timeouts and invalid responses count.
    pub max_retries: usize,
    /// The time a peer has to answer one request.
    pub request_timeout: Duration,
    /// The time a request waits for a peer before failing with `NoPeerAvailable`.
    pub assign_timeout: Duration,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            assign_timeout: DEFAULT_ASSIGN_TIMEOUT,
        }
    }
}

/// In-flight request limits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DistributorConfig {
    pub max_in_flight_per_peer: usize,
    pub max_in_flight_total: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_per_peer: DEFAULT_MAX_IN_FLIGHT_PER_PEER,
            max_in_flight_total: DEFAULT_MAX_IN_FLIGHT_TOTAL,
        }
    }
}

/// Server scoring and dial policy.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ServerPoolConfig {
    /// Success moves the score towards `1.0` by `(1 - success_decay)` of the distance, scaled by latency.
    ///
    /// Only values in `0..1` are valid.
    pub success_decay: f64,
    /// The factor a timeout or invalid response multiplies the score with.
    ///
    /// Only values in `0..1` are valid.
    pub failure_decay: f64,
    /// The latency at which a success counts half.
    pub reference_latency: Duration,
    /// Invalid responses in a row that remove a server.
    pub invalid_response_strikes: u8,
    pub dial_backoff_base: Duration,
    pub dial_backoff_max: Duration,
}

impl Default for ServerPoolConfig {
    fn default() -> Self {
        Self {
            success_decay: DEFAULT_SUCCESS_DECAY,
            failure_decay: DEFAULT_FAILURE_DECAY,
            reference_latency: DEFAULT_REFERENCE_LATENCY,
            invalid_response_strikes: DEFAULT_INVALID_RESPONSE_STRIKES,
            dial_backoff_base: DEFAULT_DIAL_BACKOFF_BASE,
            dial_backoff_max: DEFAULT_DIAL_BACKOFF_MAX,
        }
    }
}

/// The downloader config.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    pub mode: SyncMode,
    /// Headers per request.
    pub header_batch: u64,
    /// Bodies or receipts per request.
    pub block_batch: usize,
    /// Trie nodes per request.
    pub node_batch: usize,
    /// Requests each phase keeps outstanding.
    pub max_outstanding: usize,
    /// The time without progress after which the sync peer is dropped and another one picked.
    pub stall_timeout: Duration,
    /// Stalls after which the sync fails.
    pub max_stalls: usize,
    /// The deepest rollback the ancestor search allows.
    pub max_reorg_depth: u64,
    /// How far below the remote head the fast sync pivot is.
    pub pivot_distance: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Full,
            header_batch: DEFAULT_HEADER_BATCH,
            block_batch: DEFAULT_BLOCK_BATCH,
            node_batch: DEFAULT_NODE_BATCH,
            max_outstanding: DEFAULT_MAX_OUTSTANDING_BATCHES,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            max_stalls: DEFAULT_MAX_STALLS,
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            pivot_distance: DEFAULT_PIVOT_DISTANCE,
        }
    }
}

/// The block fetcher config.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    /// The length of the anti-DoS window.
    pub window: Duration,
    /// Distinct peers whose announcements are processed per window.
    pub max_peers_per_window: usize,
    /// Blocks queued for fetching at once.
    pub max_queued: usize,
    /// Announcements more than this far below our head are dropped.
    pub max_uncle_distance: u64,
    /// Announcements more than this far above our head go to the downloader.
    pub max_queue_distance: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_FETCHER_WINDOW,
            max_peers_per_window: DEFAULT_FETCHER_MAX_PEERS_PER_WINDOW,
            max_queued: DEFAULT_FETCHER_MAX_QUEUED,
            max_uncle_distance: DEFAULT_FETCHER_MAX_UNCLE_DIST,
            max_queue_distance: DEFAULT_FETCHER_MAX_QUEUE_DIST,
        }
    }
}

/// P2P config.
#[derive(Debug, Clone, PartialEq)]
pub struct P2PConfig {
    /// The address to accept connections on, [`None`] disables the inbound server.
    pub listen_addr: Option<SocketAddr>,
    /// Peers to dial on startup.
    pub bootnodes: Vec<SocketAddr>,
    /// The number of outbound connections to make and try keep.
    pub outbound_connections: usize,
    /// The maximum amount of inbound connections.
    pub max_inbound_connections: usize,
    /// The interval the syncer checks for heavier peers at.
    pub sync_check_interval: Duration,

    pub retrieve: RetrieveConfig,
    pub distributor: DistributorConfig,
    pub server_pool: ServerPoolConfig,
    pub downloader: DownloaderConfig,
    pub fetcher: FetcherConfig,
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            bootnodes: Vec::new(),
            outbound_connections: 16,
            max_inbound_connections: 64,
            sync_check_interval: DEFAULT_SYNC_CHECK_INTERVAL,
            retrieve: RetrieveConfig::default(),
            distributor: DistributorConfig::default(),
            server_pool: ServerPoolConfig::default(),
            downloader: DownloaderConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}
