use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use cinder_p2p::constants::*;
use cinder_types::SyncMode;

use super::macros::config_struct;

config_struct! {
    /// The P2P config.
    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(deny_unknown_fields, default)]
    pub struct P2PConfig {
        /// The IP address to accept connections on.
        ///
        /// Type         | IP address
        /// Examples     | "0.0.0.0", "192.168.1.50", "::"
        pub listen_on: IpAddr,

        /// The port to accept connections on.
        ///
        /// Setting this to 0 disables inbound connections.
        ///
        /// Type         | Number
        /// Valid values | 0..65534
        /// Examples     | 30803, 0
        pub p2p_port: u16,

        /// Nodes to connect to on startup.
        ///
        /// Type         | Array of socket addresses
        /// Examples     | ["10.0.0.2:30803", "[::1]:30803"]
        pub bootnodes: Vec<SocketAddr>,

        /// The amount of outbound connections to keep.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        /// Examples     | 8, 16, 32
        pub outbound_connections: usize,

        /// The maximum amount of inbound connections.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        /// Examples     | 0, 64, 256
        pub max_inbound_connections: usize,

        #[inline = true]
        /// How often connected peers are checked for a heavier chain.
        ///
        /// Type         | Duration
        /// Examples     | { secs = 10, nanos = 0 }
        pub sync_check_interval: Duration,

        #[child = true]
        /// Request retry and timeout policy.
        pub retrieve: RetrieveConfig,

        #[child = true]
        /// In-flight request limits.
        pub distributor: DistributorConfig,

        #[child = true]
        /// Peer reputation and dial policy.
        pub server_pool: ServerPoolConfig,

        #[child = true]
        /// Chain sync batching and stall policy.
        pub downloader: DownloaderConfig,

        #[child = true]
        /// Limits on block announcements.
        pub fetcher: FetcherConfig,
    }
}

impl Default for P2PConfig {
    fn default() -> Self {
        let defaults = cinder_p2p::P2PConfig::default();

        Self {
            listen_on: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            p2p_port: 30803,
            bootnodes: Vec::new(),
            outbound_connections: defaults.outbound_connections,
            max_inbound_connections: defaults.max_inbound_connections,
            sync_check_interval: DEFAULT_SYNC_CHECK_INTERVAL,
            retrieve: RetrieveConfig::default(),
            distributor: DistributorConfig::default(),
            server_pool: ServerPoolConfig::default(),
            downloader: DownloaderConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

impl P2PConfig {
    /// The [`cinder_p2p::P2PConfig`] for a node syncing in `mode`.
    pub fn p2p_config(&self, mode: SyncMode) -> cinder_p2p::P2PConfig {
        let listen_addr = match self.p2p_port {
            0 => None,
            port => Some(SocketAddr::new(self.listen_on, port)),
        };

        cinder_p2p::P2PConfig {
            listen_addr,
            bootnodes: self.bootnodes.clone(),
            outbound_connections: self.outbound_connections,
            max_inbound_connections: self.max_inbound_connections,
            sync_check_interval: self.sync_check_interval,
            retrieve: self.retrieve.into(),
            distributor: self.distributor.into(),
            server_pool: self.server_pool.into(),
            downloader: self.downloader.downloader_config(mode),
            fetcher: self.fetcher.into(),
        }
    }
}

config_struct! {
    #[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct RetrieveConfig {
        /// Retries after the first attempt of a request.
        ///
        /// Timeouts and invalid responses use up a retry,
        /// requests lost to a disconnect do not.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub max_retries: usize,

        #[inline = true]
        /// The time a peer has to answer one request.
        pub request_timeout: Duration,

        #[inline = true]
        /// The time a request waits for a free peer before failing.
        pub assign_timeout: Duration,
    }
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

impl From<RetrieveConfig> for cinder_p2p::RetrieveConfig {
    fn from(value: RetrieveConfig) -> Self {
        Self {
            max_retries: value.max_retries,
            request_timeout: value.request_timeout,
            assign_timeout: value.assign_timeout,
        }
    }
}

config_struct! {
    #[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct DistributorConfig {
        /// Requests one peer can be working on at once.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_in_flight_per_peer: usize,

        /// Requests all peers together can be working on at once.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_in_flight_total: usize,
    }
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_per_peer: DEFAULT_MAX_IN_FLIGHT_PER_PEER,
            max_in_flight_total: DEFAULT_MAX_IN_FLIGHT_TOTAL,
        }
    }
}

impl From<DistributorConfig> for cinder_p2p::DistributorConfig {
    fn from(value: DistributorConfig) -> Self {
        Self {
            max_in_flight_per_peer: value.max_in_flight_per_peer,
            max_in_flight_total: value.max_in_flight_total,
        }
    }
}

config_struct! {
    #[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq)]
    #[serde(deny_unknown_fields, default)]
    pub struct ServerPoolConfig {
        /// How slowly a peer's score recovers after a good answer.
        ///
        /// Type         | Floating point number
        /// Valid values | 0.0..1.0
        pub success_decay: f64,

        /// The factor a peer's score is multiplied with after a failure.
        ///
        /// Type         | Floating point number
        /// Valid values | 0.0..1.0
        pub failure_decay: f64,

        #[inline = true]
        /// The answer latency at which a success counts half.
        pub reference_latency: Duration,

        /// Invalid answers in a row that remove a peer.
        ///
        /// Type         | Number
        /// Valid values | 1..255
        pub invalid_response_strikes: u8,

        #[inline = true]
        /// The wait before redialing a peer after its first failed dial.
        ///
        /// The wait doubles with each failure.
        pub dial_backoff_base: Duration,

        #[inline = true]
        /// The longest wait before redialing a peer.
        pub dial_backoff_max: Duration,
    }
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

impl From<ServerPoolConfig> for cinder_p2p::ServerPoolConfig {
    fn from(value: ServerPoolConfig) -> Self {
        Self {
            success_decay: value.success_decay,
            failure_decay: value.failure_decay,
            reference_latency: value.reference_latency,
            invalid_response_strikes: value.invalid_response_strikes,
            dial_backoff_base: value.dial_backoff_base,
            dial_backoff_max: value.dial_backoff_max,
        }
    }
}

config_struct! {
    #[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct DownloaderConfig {
        /// Headers asked for in one request.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub header_batch: u64,

        /// Bodies or receipts asked for in one request.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub block_batch: usize,

        /// State trie nodes asked for in one request.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub node_batch: usize,

        /// Requests each sync phase keeps outstanding.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_outstanding: usize,

        #[inline = true]
        /// The time without progress after which another peer is tried.
        pub stall_timeout: Duration,

        /// Stalls after which a sync attempt fails.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_stalls: usize,

        /// The deepest rollback a sync is allowed to cause.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub max_reorg_depth: u64,

        /// How far below the remote head fast sync downloads state.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub pivot_distance: u64,
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
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

impl DownloaderConfig {
    /// The [`cinder_p2p::DownloaderConfig`], the mode comes from the top level config.
    pub const fn downloader_config(&self, mode: SyncMode) -> cinder_p2p::DownloaderConfig {
        cinder_p2p::DownloaderConfig {
            mode,
            header_batch: self.header_batch,
            block_batch: self.block_batch,
            node_batch: self.node_batch,
            max_outstanding: self.max_outstanding,
            stall_timeout: self.stall_timeout,
            max_stalls: self.max_stalls,
            max_reorg_depth: self.max_reorg_depth,
            pivot_distance: self.pivot_distance,
        }
    }
}

config_struct! {
    #[derive(Debug, Copy, Clone, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct FetcherConfig {
        #[inline = true]
        /// The length of the announcement rate limit window.
        pub window: Duration,

        /// Peers whose announcements are handled per window.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_peers_per_window: usize,

        /// Announced blocks waiting to be fetched at once.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub max_queued: usize,

        /// Announcements further below our head are dropped.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub max_uncle_distance: u64,

        /// Announcements further above our head start a sync instead.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub max_queue_distance: u64,
    }
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

impl From<FetcherConfig> for cinder_p2p::FetcherConfig {
    fn from(value: FetcherConfig) -> Self {
        Self {
            window: value.window,
            max_peers_per_window: value.max_peers_per_window,
            max_queued: value.max_queued,
            max_uncle_distance: value.max_uncle_distance,
            max_queue_distance: value.max_queue_distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let config = P2PConfig::default().p2p_config(SyncMode::Fast);
        let library = cinder_p2p::P2PConfig::default();

        assert_eq!(config.retrieve, library.retrieve);
        assert_eq!(config.distributor, library.distributor);
        assert_eq!(config.server_pool, library.server_pool);
        assert_eq!(config.fetcher, library.fetcher);
        assert_eq!(
            config.downloader,
            cinder_p2p::DownloaderConfig {
                mode: SyncMode::Fast,
                ..library.downloader
            }
        );
    }

    #[test]
    fn port_zero_disables_inbound() {
        let mut config = P2PConfig {
            p2p_port: 0,
            ..Default::default()
        };
        assert_eq!(config.p2p_config(SyncMode::Full).listen_addr, None);

        config.p2p_port = 4000;
        assert_eq!(
            config.p2p_config(SyncMode::Full).listen_addr,
            Some("0.0.0.0:4000".parse().unwrap())
        );
    }
}
