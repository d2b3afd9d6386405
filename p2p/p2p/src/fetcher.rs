//! # Fetcher
//!
//! The fetcher follows the network's head one block at a time, without the full
//! [`Downloader`](crate::downloader::Downloader) pipeline.
//!
//! Peers announce new blocks by hash ([`FetcherHandle::notify`]) or propagate them whole
//! ([`FetcherHandle::enqueue`]). An announced block close to our head is fetched from the
//! announcer, header first, then its body unless we are a light node. A block whose parent
//! we have is inserted straight away, taking the chain's writer like the downloader does.
//! A block whose parent we are missing, or one too far above our head, is handed to the
//! syncer as a [`SyncTarget`] instead.
//!
//! Announcements of blocks we have or are already fetching are dropped without a word.
//! Only [`FetcherConfig::max_peers_per_window`] distinct peers are listened to per
//! [`FetcherConfig::window`], announcements from any further peer are counted and dropped.
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{sync::mpsc, task::JoinSet, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use cinder_blockchain::{BlockChain, ChainError};
use cinder_p2p_core::PeerId;
use cinder_types::{Block, BlockBody, Hash, HashOrNumber, HeadInfo, Header, SyncMode};
use cinder_wire::{BlockAnnouncement, NewBlock, ProtocolRequest, ProtocolResponse};

use crate::{
    config::FetcherConfig,
    distributor::RequestCriteria,
    downloader::SyncTarget,
    retrieve::{InvalidResponse, RetrieveError, RetrieveManager, RetrieveRequest},
    server_pool::Outcome,
};

/// The capacity of the channel between the [`FetcherHandle`]s and the [`Fetcher`].
const EVENT_CHANNEL_SIZE: usize = 256;

//---------------------------------------------------------------------------------------------------- Stats
/// Counters over everything the fetcher was told about.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FetcherStats {
    pub announces_in: u64,
    /// Announcements out of range, or over the queue limit.
    pub announces_dropped: u64,
    /// Announcements dropped by the anti-DoS window.
    pub announces_dos: u64,
    pub broadcasts_in: u64,
    pub broadcasts_dropped: u64,
    pub broadcasts_dos: u64,
    pub header_fetches: u64,
    pub body_fetches: u64,
    pub imported: u64,
    /// Blocks handed to the downloader.
    pub deferred: u64,
}

#[derive(Debug, Default)]
struct Counters {
    announces_in: AtomicU64,
    announces_dropped: AtomicU64,
    announces_dos: AtomicU64,
    broadcasts_in: AtomicU64,
    broadcasts_dropped: AtomicU64,
    broadcasts_dos: AtomicU64,
    header_fetches: AtomicU64,
    body_fetches: AtomicU64,
    imported: AtomicU64,
    deferred: AtomicU64,
}

impl Counters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FetcherStats {
        FetcherStats {
            announces_in: self.announces_in.load(Ordering::Relaxed),
            announces_dropped: self.announces_dropped.load(Ordering::Relaxed),
            announces_dos: self.announces_dos.load(Ordering::Relaxed),
            broadcasts_in: self.broadcasts_in.load(Ordering::Relaxed),
            broadcasts_dropped: self.broadcasts_dropped.load(Ordering::Relaxed),
            broadcasts_dos: self.broadcasts_dos.load(Ordering::Relaxed),
            header_fetches: self.header_fetches.load(Ordering::Relaxed),
            body_fetches: self.body_fetches.load(Ordering::Relaxed),
            imported: self.imported.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

//---------------------------------------------------------------------------------------------------- FetcherHandle
enum FetcherEvent {
    Announce {
        peer: PeerId,
        announcement: BlockAnnouncement,
    },
    Broadcast {
        peer: PeerId,
        block: Box<NewBlock>,
    },
}

/// Feeds announcements to a running [`Fetcher`].
#[derive(Clone)]
pub struct FetcherHandle {
    tx: mpsc::Sender<FetcherEvent>,
    counters: Arc<Counters>,
}

impl FetcherHandle {
    /// Tells the fetcher `peer` announced a block by hash.
    pub fn notify(&self, peer: PeerId, announcement: BlockAnnouncement) {
        Counters::inc(&self.counters.announces_in);

        if self
            .tx
            .try_send(FetcherEvent::Announce { peer, announcement })
            .is_err()
        {
            Counters::inc(&self.counters.announces_dropped);
        }
    }

    /// Gives the fetcher a whole block `peer` propagated.
    pub fn enqueue(&self, peer: PeerId, block: Box<NewBlock>) {
        Counters::inc(&self.counters.broadcasts_in);

        if self
            .tx
            .try_send(FetcherEvent::Broadcast { peer, block })
            .is_err()
        {
            Counters::inc(&self.counters.broadcasts_dropped);
        }
    }

    pub fn stats(&self) -> FetcherStats {
        self.counters.snapshot()
    }
}

//---------------------------------------------------------------------------------------------------- DosWindow
/// The distinct peers heard from in the current window.
struct DosWindow {
    started: Instant,
    peers: HashSet<PeerId>,
}

impl DosWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            peers: HashSet::new(),
        }
    }

    /// Returns `true` if an announcement from `peer` may be processed.
    fn admit(&mut self, peer: PeerId, config: &FetcherConfig) -> bool {
        let now = Instant::now();
        if now.duration_since(self.started) >= config.window {
            self.started = now;
            self.peers.clear();
        }

        if self.peers.contains(&peer) {
            return true;
        }
        if self.peers.len() >= config.max_peers_per_window {
            return false;
        }

        self.peers.insert(peer);
        true
    }
}

//---------------------------------------------------------------------------------------------------- Fetcher
/// What fetching an announced block ended with.
enum Fetched {
    /// The block can be inserted, in light mode its body is empty and unused.
    Ready(Block),
    /// The block's parent is unknown.
    Orphan(Header),
}

struct FetchResult {
    peer: PeerId,
    hash: Hash,
    weight: u128,
    result: Result<Fetched, RetrieveError>,
}

/// Fetches and inserts single announced blocks, see the [module docs](self).
pub struct Fetcher {
    chain: Arc<BlockChain>,
    retriever: RetrieveManager,
    config: FetcherConfig,

    event_rx: mpsc::Receiver<FetcherEvent>,
    /// Where blocks the fetcher can not insert go.
    sync_tx: mpsc::Sender<SyncTarget>,
    counters: Arc<Counters>,

    dos: DosWindow,
    /// Blocks being fetched.
    queued: HashSet<Hash>,
    fetches: JoinSet<FetchResult>,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Returns the [`Fetcher`], to be [`run`](Fetcher::run), and a handle to feed it.
    pub fn new(
        chain: Arc<BlockChain>,
        retriever: RetrieveManager,
        config: FetcherConfig,
        sync_tx: mpsc::Sender<SyncTarget>,
    ) -> (Self, FetcherHandle) {
        let (tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let counters = Arc::new(Counters::default());

        let fetcher = Self {
            chain,
            retriever,
            config,
            event_rx,
            sync_tx,
            counters: Arc::clone(&counters),
            dos: DosWindow::new(),
            queued: HashSet::new(),
            fetches: JoinSet::new(),
            cancel: CancellationToken::new(),
        };

        (fetcher, FetcherHandle { tx, counters })
    }

    /// Runs until every [`FetcherHandle`] is dropped.
    #[instrument(level = "info", name = "fetcher", skip_all)]
    pub async fn run(mut self) {
        let _cancel_on_exit = self.cancel.clone().drop_guard();

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(FetcherEvent::Announce { peer, announcement }) => {
                        self.handle_announcement(peer, announcement);
                    }
                    Some(FetcherEvent::Broadcast { peer, block }) => {
                        self.handle_broadcast(peer, *block).await;
                    }
                    None => break,
                },
                Some(joined) = self.fetches.join_next() => match joined {
                    Ok(fetched) => self.handle_fetched(fetched).await,
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(_) => (),
                },
            }
        }

        tracing::info!("fetcher shut down");
    }

    fn handle_announcement(&mut self, peer: PeerId, announcement: BlockAnnouncement) {
        if !self.dos.admit(peer, &self.config) {
            tracing::trace!(%peer, "announcement dropped by the DoS window");
            Counters::inc(&self.counters.announces_dos);
            return;
        }

        let BlockAnnouncement {
            hash,
            number,
            weight,
        } = announcement;

        let local = match self.local_height_if_unknown(&hash) {
            Ok(Some(local)) => local,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("failed to read the chain: {e}");
                return;
            }
        };

        if self.queued.contains(&hash) {
            return;
        }

        if number.saturating_add(self.config.max_uncle_distance) < local {
            tracing::trace!(%peer, number, "announced block is too old");
            Counters::inc(&self.counters.announces_dropped);
            return;
        }

        if number > local.saturating_add(self.config.max_queue_distance) {
            self.defer(peer, HeadInfo { hash, number, weight });
            return;
        }

        if self.queued.len() >= self.config.max_queued {
            Counters::inc(&self.counters.announces_dropped);
            return;
        }

        tracing::debug!(%peer, number, hash = hex::encode(&hash[..8]), "fetching announced block");
        self.queued.insert(hash);

        let chain = Arc::clone(&self.chain);
        let retriever = self.retriever.clone();
        let counters = Arc::clone(&self.counters);
        let cancel = self.cancel.clone();

        self.fetches.spawn(
            async move {
                let result = fetch_block(&chain, &retriever, &counters, &cancel, peer, hash).await;
                FetchResult {
                    peer,
                    hash,
                    weight,
                    result,
                }
            }
            .in_current_span(),
        );
    }

    async fn handle_broadcast(&mut self, peer: PeerId, new_block: NewBlock) {
        if !self.dos.admit(peer, &self.config) {
            Counters::inc(&self.counters.broadcasts_dos);
            return;
        }

        let NewBlock { block, weight } = new_block;
        let hash = block.hash();
        let number = block.number();

        if self.queued.contains(&hash) {
            return;
        }

        let local = match self.local_height_if_unknown(&hash) {
            Ok(Some(local)) => local,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("failed to read the chain: {e}");
                return;
            }
        };

        if number.saturating_add(self.config.max_uncle_distance) < local
            || block.body.tx_root() != block.header.tx_root
        {
            Counters::inc(&self.counters.broadcasts_dropped);
            return;
        }

        let head = HeadInfo { hash, number, weight };
        if number > local.saturating_add(self.config.max_queue_distance) {
            self.defer(peer, head);
            return;
        }

        match parent_known(&self.chain, &block.header) {
            Ok(true) => self.insert(peer, head, block).await,
            Ok(false) => self.defer(peer, head),
            Err(e) => tracing::warn!("failed to read the chain: {e}"),
        }
    }

    async fn handle_fetched(&mut self, fetched: FetchResult) {
        let FetchResult {
            peer,
            hash,
            weight,
            result,
        } = fetched;
        self.queued.remove(&hash);

        match result {
            Ok(Fetched::Ready(block)) => {
                let head = HeadInfo {
                    hash,
                    number: block.number(),
                    weight,
                };
                self.insert(peer, head, block).await;
            }
            Ok(Fetched::Orphan(header)) => self.defer(
                peer,
                HeadInfo {
                    hash,
                    number: header.number,
                    weight,
                },
            ),
            Err(e) => tracing::debug!(%peer, "failed to fetch announced block: {e}"),
        }
    }

    /// Inserts a block whose parent we have, deferring it if the parent turns out to be missing.
    async fn insert(&self, peer: PeerId, head: HeadInfo, block: Block) {
        let res = {
            let mut writer = self.chain.writer().await;
            match self.chain.mode() {
                SyncMode::Light => writer.insert_headers(vec![block.header]).await,
                SyncMode::Full | SyncMode::Fast => writer.insert_blocks(vec![block]).await,
            }
        };

        match res {
            Ok(_) => {
                tracing::debug!(number = head.number, "imported announced block");
                Counters::inc(&self.counters.imported);
            }
            Err(ChainError::UnknownParent(_) | ChainError::MissingState { .. }) => {
                self.defer(peer, head);
            }
            Err(
                e @ (ChainError::Consensus { .. }
                | ChainError::BodyMismatch { .. }
                | ChainError::ReceiptsMismatch { .. }
                | ChainError::StateRootMismatch { .. }),
            ) => {
                tracing::warn!(%peer, "peer announced an invalid block: {e}");
                self.retriever
                    .distributor()
                    .server_pool()
                    .report(peer, Outcome::InvalidResponse);
            }
            Err(e) => tracing::warn!("failed to import announced block: {e}"),
        }
    }

    /// Hands `head` to the syncer.
    fn defer(&self, peer: PeerId, head: HeadInfo) {
        tracing::debug!(%peer, number = head.number, "deferring block to the downloader");
        Counters::inc(&self.counters.deferred);

        if self.sync_tx.try_send(SyncTarget { peer, head }).is_err() {
            tracing::trace!("syncer is busy, dropped sync target");
        }
    }

    /// Returns our head's height, or [`None`] if we already have the block with `hash`.
    ///
    /// In light mode having the header is enough.
    fn local_height_if_unknown(&self, hash: &Hash) -> Result<Option<u64>, ChainError> {
        let known = match self.chain.mode() {
            SyncMode::Light => self.chain.has_header(hash)?,
            SyncMode::Full | SyncMode::Fast => self.chain.has_body(hash)?,
        };

        if known {
            return Ok(None);
        }
        Ok(Some(self.chain.head()?.number))
    }
}

/// Returns `true` if the parent of `header` is stored well enough to build on.
fn parent_known(chain: &BlockChain, header: &Header) -> Result<bool, ChainError> {
    match chain.mode() {
        SyncMode::Light => chain.has_header(&header.parent_hash),
        SyncMode::Full | SyncMode::Fast => match chain.header(&header.parent_hash)? {
            Some(parent) => chain.is_block_imported(&parent),
            None => Ok(false),
        },
    }
}

/// Fetches the header of the block `hash` from `peer`, then its body if it is needed.
async fn fetch_block(
    chain: &BlockChain,
    retriever: &RetrieveManager,
    counters: &Counters,
    cancel: &CancellationToken,
    peer: PeerId,
    hash: Hash,
) -> Result<Fetched, RetrieveError> {
    Counters::inc(&counters.header_fetches);
    let response = retriever
        .retrieve(header_request(peer, hash), cancel)
        .await?
        .response;
    let ProtocolResponse::BlockHeaders(mut headers) = response else {
        unreachable!("the validator only accepts headers");
    };
    let header = headers.pop().expect("the validator only accepts one header");

    match parent_known(chain, &header) {
        Ok(true) => (),
        Ok(false) => return Ok(Fetched::Orphan(header)),
        Err(e) => {
            tracing::warn!("failed to read the chain: {e}");
            return Ok(Fetched::Orphan(header));
        }
    }

    if chain.mode() == SyncMode::Light || header.has_empty_body() {
        return Ok(Fetched::Ready(Block {
            header,
            body: BlockBody::default(),
        }));
    }

    Counters::inc(&counters.body_fetches);
    let response = retriever
        .retrieve(body_request(peer, hash, header.tx_root), cancel)
        .await?
        .response;
    let ProtocolResponse::BlockBodies(mut bodies) = response else {
        unreachable!("the validator only accepts bodies");
    };
    let body = bodies.pop().expect("the validator only accepts one body");

    Ok(Fetched::Ready(Block { header, body }))
}

fn header_request(peer: PeerId, hash: Hash) -> RetrieveRequest {
    RetrieveRequest::new(
        ProtocolRequest::GetBlockHeaders {
            origin: HashOrNumber::Hash(hash),
            amount: 1,
            skip: 0,
            reverse: false,
        },
        RequestCriteria::peer(peer),
        move |response| {
            let ProtocolResponse::BlockHeaders(headers) = response else {
                return Err(InvalidResponse("expected headers"));
            };
            let [header] = headers.as_slice() else {
                return Err(InvalidResponse("expected one header"));
            };
            if header.hash() != hash {
                return Err(InvalidResponse("header is not the announced one"));
            }
            Ok(())
        },
    )
}

fn body_request(peer: PeerId, hash: Hash, tx_root: Hash) -> RetrieveRequest {
    RetrieveRequest::new(
        ProtocolRequest::GetBlockBodies(vec![hash]),
        RequestCriteria::peer(peer),
        move |response| {
            let ProtocolResponse::BlockBodies(bodies) = response else {
                return Err(InvalidResponse("expected bodies"));
            };
            let [body] = bodies.as_slice() else {
                return Err(InvalidResponse("expected one body"));
            };
            if body.tx_root() != tx_root {
                return Err(InvalidResponse("body does not match its header"));
            }
            Ok(())
        },
    )
}
