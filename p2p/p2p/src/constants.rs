//! Default values for the tunables in [`config`](crate::config).

use std::time::Duration;

//---------------------------------------------------------------------------------------------------- Retrieval
/// The amount of times a failed retrieval is retried before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// The time a peer has to answer one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// The time a request waits for a free peer before failing with `NoPeerAvailable`.
pub const DEFAULT_ASSIGN_TIMEOUT: Duration = Duration::from_secs(5);

/// The amount of times a request is re-queued because its peer disconnected.
///
/// These do not count towards the retry budget but are still bounded.
pub(crate) const MAX_DISCONNECT_REQUEUES: usize = 16;

//---------------------------------------------------------------------------------------------------- Distributor
/// The maximum amount of requests in flight to one peer.
pub const DEFAULT_MAX_IN_FLIGHT_PER_PEER: usize = 4;

/// The maximum amount of requests in flight across all peers.
pub const DEFAULT_MAX_IN_FLIGHT_TOTAL: usize = 256;

//---------------------------------------------------------------------------------------------------- Server pool
/// The amount of invalid responses in a row that removes a peer from the server pool.
pub const DEFAULT_INVALID_RESPONSE_STRIKES: u8 = 3;

/// The factor a success moves the score towards `1.0` with, smaller moves faster.
pub const DEFAULT_SUCCESS_DECAY: f64 = 0.9;

/// The factor a failure multiplies the score with.
pub const DEFAULT_FAILURE_DECAY: f64 = 0.8;

/// A response this fast gets half of the full success weight.
pub const DEFAULT_REFERENCE_LATENCY: Duration = Duration::from_millis(250);

/// The score of a server we have not heard from yet.
pub const INITIAL_SCORE: f64 = 0.5;

/// The first dial backoff.
pub const DEFAULT_DIAL_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// The longest dial backoff.
pub const DEFAULT_DIAL_BACKOFF_MAX: Duration = Duration::from_secs(60 * 30);

/// The interval the server pool is written to the store at.
pub const SERVER_POOL_SAVE_INTERVAL: Duration = Duration::from_secs(60);

//---------------------------------------------------------------------------------------------------- Downloader
/// The amount of headers requested at once.
pub const DEFAULT_HEADER_BATCH: u64 = 192;

/// The amount of bodies or receipts requested at once.
pub const DEFAULT_BLOCK_BATCH: usize = 128;

/// The amount of trie nodes requested at once.
pub const DEFAULT_NODE_BATCH: usize = 384;

/// The amount of requests each downloader phase has outstanding.
pub const DEFAULT_MAX_OUTSTANDING_BATCHES: usize = 4;

/// The time without progress after which a sync is considered stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// The amount of stalls after which a sync fails.
pub const DEFAULT_MAX_STALLS: usize = 3;

/// The deepest reorganisation the downloader will follow.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 90_000;

/// The amount of headers fetched around our head before the ancestor binary search.
pub const ANCESTOR_SPAN_LEN: u64 = 16;

/// The distance of the fast sync pivot block from the remote head.
pub const DEFAULT_PIVOT_DISTANCE: u64 = 64;

//---------------------------------------------------------------------------------------------------- Fetcher
/// The length of the fetcher's anti-DoS window.
pub const DEFAULT_FETCHER_WINDOW: Duration = Duration::from_secs(1);

/// The amount of distinct peers whose announcements are processed per window.
pub const DEFAULT_FETCHER_MAX_PEERS_PER_WINDOW: usize = 16;

/// The amount of unknown blocks the fetcher queues.
pub const DEFAULT_FETCHER_MAX_QUEUED: usize = 64;

/// How far below our head an announced block may be.
pub const DEFAULT_FETCHER_MAX_UNCLE_DIST: u64 = 7;

/// How far above our head an announced block may be before the downloader takes over.
pub const DEFAULT_FETCHER_MAX_QUEUE_DIST: u64 = 32;

//---------------------------------------------------------------------------------------------------- Syncer
/// The interval the syncer checks for heavier peers at.
pub const DEFAULT_SYNC_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// The capacity of the announcement channel every connection feeds.
pub const ANNOUNCEMENT_CHANNEL_SIZE: usize = 256;

//---------------------------------------------------------------------------------------------------- Connections
/// The time to sleep after an inbound connection comes in.
pub(crate) const INBOUND_CONNECTION_COOL_DOWN: Duration = Duration::from_millis(500);

/// How often the connection maintainer checks the outbound connection count.
pub(crate) const OUTBOUND_CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// The time a TCP connect has before the dial counts as failed.
pub(crate) const OUTBOUND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The amount of sync targets the fetcher can hand the syncer before dropping them.
pub(crate) const SYNC_TARGET_CHANNEL_SIZE: usize = 16;
