//! # Downloader
//!
//! The downloader brings the local chain up to a heavier peer's head.
//!
//! A sync moves through [`DownloaderState`]s:
//!
//! 1. [`DownloaderState::FindingAncestor`]: the highest block both chains share is found
//!    by probing the headers just below our head, then binary searching down to the
//!    deepest allowed rollback.
//! 2. [`DownloaderState::FetchingHeaders`]: headers above the ancestor are fetched from
//!    the sync peer in batches, several batches in flight at once, and applied to the chain
//!    strictly in height order.
//! 3. [`DownloaderState::FetchingBodiesAndReceipts`]: every applied header batch is handed to
//!    the body stage, which fetches bodies (and receipts in fast sync) from any full server,
//!    checks them against the headers and imports them in height order.
//! 4. [`DownloaderState::ProcessingState`]: in fast sync the state trie of the pivot block is
//!    downloaded, after which the blocks above the pivot are executed on top of it.
//!
//! The stages run concurrently, a watchdog fails the attempt if no stage makes progress for
//! [`DownloaderConfig::stall_timeout`], after which another peer is picked.
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use cinder_blockchain::{BlockChain, ChainError};
use cinder_p2p_core::PeerId;
use cinder_types::{HeadInfo, SyncMode, SyncStatus};
use cinder_wire::{PeerCapabilities, ProtocolResponse};

use crate::{
    config::DownloaderConfig,
    peer_set::PeerSet,
    retrieve::{InvalidResponse, RetrieveError, RetrieveManager, RetrieveRequest},
    server_pool::Outcome,
};

mod ancestor;
mod block_queue;
mod bodies;
mod headers;
mod state_sync;
mod stats;
#[cfg(test)]
mod tests;

pub use stats::DownloaderStats;
use stats::Counters;

//---------------------------------------------------------------------------------------------------- Types
/// The phase of the current, or last, sync.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DownloaderState {
    #[default]
    Idle,
    FindingAncestor,
    FetchingHeaders,
    FetchingBodiesAndReceipts,
    ProcessingState,
    Done,
    Cancelled,
    Failed,
}

/// A peer to sync from and the head it advertised.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub peer: PeerId,
    pub head: HeadInfo,
}

/// An error syncing.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync to an equal or heavier head is already running")]
    Busy,
    #[error("the sync was cancelled")]
    Cancelled,
    #[error("the sync stopped making progress")]
    Stalled,
    #[error("no peer is available to sync from")]
    NoPeers,
    #[error("the sync peer sent headers that do not link at {number}")]
    HeaderChainBroken { number: u64 },
    #[error("the common ancestor is deeper than the allowed rollback")]
    ReorgTooDeep,
    #[error("the downloader's sync mode does not fit the chain")]
    ModeMismatch,
    #[error("a peer answered with the wrong kind of response")]
    WrongResponse,
    #[error(transparent)]
    Retrieve(RetrieveError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<RetrieveError> for SyncError {
    fn from(value: RetrieveError) -> Self {
        match value {
            RetrieveError::Cancelled => Self::Cancelled,
            RetrieveError::NoPeerAvailable | RetrieveError::RetrievalExhausted { .. } => {
                Self::Retrieve(value)
            }
        }
    }
}

impl SyncError {
    /// Returns `true` if another peer may get further.
    const fn is_stall(&self) -> bool {
        matches!(self, Self::Stalled | Self::Retrieve(_))
    }
}

/// The sync that is running.
struct ActiveSync {
    id: u64,
    weight: u128,
    cancel: CancellationToken,
    stalled: Arc<AtomicBool>,
}

struct Inner {
    chain: Arc<BlockChain>,
    retriever: RetrieveManager,
    config: DownloaderConfig,

    state: Arc<watch::Sender<DownloaderState>>,
    status: Mutex<SyncStatus>,
    active: Mutex<Option<ActiveSync>>,
    next_sync_id: AtomicU64,
    /// Held for the whole of a sync, a preempting sync waits for the old one to stop.
    run_lock: tokio::sync::Mutex<()>,

    counters: Arc<Counters>,
}

//---------------------------------------------------------------------------------------------------- Downloader
/// Syncs the local chain with heavier peers, see the [module docs](self).
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    /// # Errors
    /// Returns [`SyncError::ModeMismatch`] if a light downloader is made for a chain storing
    /// blocks, or the other way around.
    pub fn new(
        chain: Arc<BlockChain>,
        retriever: RetrieveManager,
        config: DownloaderConfig,
    ) -> Result<Self, SyncError> {
        if (config.mode == SyncMode::Light) != (chain.mode() == SyncMode::Light) {
            return Err(SyncError::ModeMismatch);
        }

        let height = chain.head()?.number;

        Ok(Self {
            inner: Arc::new(Inner {
                chain,
                retriever,
                config,
                state: Arc::new(watch::channel(DownloaderState::Idle).0),
                status: Mutex::new(SyncStatus {
                    starting_height: height,
                    current_height: height,
                    highest_known_height: height,
                }),
                active: Mutex::new(None),
                next_sync_id: AtomicU64::new(0),
                run_lock: tokio::sync::Mutex::new(()),
                counters: Arc::new(Counters::default()),
            }),
        })
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.inner.chain
    }

    pub fn peer_set(&self) -> &Arc<PeerSet> {
        self.inner.retriever.distributor().peer_set()
    }

    pub fn state(&self) -> DownloaderState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DownloaderState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> DownloaderStats {
        self.inner.counters.snapshot()
    }

    /// Returns `true` if a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The progress of the current, or last, sync.
    pub fn progress(&self) -> SyncStatus {
        let mut status = *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(head) = self.inner.chain.head() {
            status.current_height = head.number;
            status.highest_known_height = status.highest_known_height.max(head.number);
        }
        status
    }

    /// Stops the running sync, it finishes with [`SyncError::Cancelled`].
    pub fn cancel(&self) {
        let active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = active.as_ref() {
            active.cancel.cancel();
        }
    }

    /// Syncs with `target`, returning once the chain reached its head.
    ///
    /// A sync that is already running is only replaced if `target` is strictly heavier,
    /// or the running sync is stalled.
    ///
    /// # Errors
    /// - [`SyncError::Busy`] if another sync is running and was not replaced.
    /// - [`SyncError::Cancelled`] if the sync was cancelled or replaced.
    /// - [`SyncError::Stalled`] if every peer tried stopped making progress.
    /// - Any other [`SyncError`] for a chain inconsistency, these are safe to retry.
    #[instrument(level = "info", name = "sync", skip_all, fields(peer = target.peer.0, number = target.head.number))]
    pub async fn synchronise(&self, target: SyncTarget) -> Result<(), SyncError> {
        let inner = &self.inner;

        if target.head.weight <= inner.chain.head_info()?.weight {
            tracing::debug!("target is not heavier than our chain");
            return Ok(());
        }

        let id = inner.next_sync_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let stalled = Arc::new(AtomicBool::new(false));

        {
            let mut active = inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = active.as_ref() {
                if target.head.weight <= current.weight && !current.stalled.load(Ordering::Acquire)
                {
                    return Err(SyncError::Busy);
                }
                tracing::info!("replacing the running sync");
                current.cancel.cancel();
            }
            *active = Some(ActiveSync {
                id,
                weight: target.head.weight,
                cancel: cancel.clone(),
                stalled: Arc::clone(&stalled),
            });
        }

        let _run = inner.run_lock.lock().await;

        let res = if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            self.run(target, &cancel, &stalled).await
        };

        {
            let mut active = inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.as_ref().is_some_and(|active| active.id == id) {
                *active = None;
            }
        }

        let state = match &res {
            Ok(()) => DownloaderState::Done,
            Err(SyncError::Cancelled) => DownloaderState::Cancelled,
            Err(_) => DownloaderState::Failed,
        };
        inner.state.send_replace(state);

        match &res {
            Ok(()) => tracing::info!("sync finished"),
            Err(e) => tracing::warn!("sync failed: {e}"),
        }

        res
    }

    /// Runs sync attempts, replacing the peer after every stall.
    async fn run(
        &self,
        mut target: SyncTarget,
        cancel: &CancellationToken,
        stalled: &Arc<AtomicBool>,
    ) -> Result<(), SyncError> {
        let inner = &self.inner;

        let starting_height = inner.chain.head()?.number;
        *inner.status.lock().unwrap_or_else(PoisonError::into_inner) = SyncStatus {
            starting_height,
            current_height: starting_height,
            highest_known_height: target.head.number,
        };

        if !self.peer_set().contains(&target.peer) {
            target = self.next_target(&HashSet::new(), true).ok_or(SyncError::NoPeers)?;
        }

        let mut tried = HashSet::new();
        let mut stalls = 0;

        loop {
            tried.insert(target.peer);
            self.raise_highest_known(target.head.number);

            let attempt = SyncAttempt {
                chain: Arc::clone(&inner.chain),
                retriever: inner.retriever.clone(),
                config: inner.config,
                counters: Arc::clone(&inner.counters),
                cancel: cancel.child_token(),
                target,
                state: Arc::clone(&inner.state),
                progress: watch::channel(0).0,
            };

            let err = match attempt.sync(stalled).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_stall() || cancel.is_cancelled() => {
                    return Err(if cancel.is_cancelled() {
                        SyncError::Cancelled
                    } else {
                        e
                    })
                }
                Err(e) => e,
            };

            stalls += 1;
            Counters::add(&inner.counters.stalls, 1);
            tracing::info!(peer = target.peer.0, stalls, "sync peer stalled: {err}");

            // Peers that were tried before get another chance until the stall budget is spent.
            let mut next = self.next_target(&tried, false);
            if next.is_none() && stalls < inner.config.max_stalls {
                next = self.next_target(&HashSet::new(), false);
            }
            let Some(next) = next else {
                return Err(err);
            };

            stalled.store(false, Ordering::Release);
            target = next;
        }
    }

    /// The heaviest peer heavier than our chain that is not in `exclude`.
    ///
    /// With `any_peer` peers are picked even if they are not full servers, this is only
    /// used to find a first target.
    fn next_target(&self, exclude: &HashSet<PeerId>, any_peer: bool) -> Option<SyncTarget> {
        let local = self.inner.chain.head_info().ok()?.weight;
        let capabilities = if self.inner.config.mode == SyncMode::Light || any_peer {
            PeerCapabilities::empty()
        } else {
            PeerCapabilities::FULL_SERVER
        };

        self.peer_set()
            .peers_with_capability(capabilities)
            .into_iter()
            .filter(|entry| !exclude.contains(&entry.id()) && entry.head().weight > local)
            .max_by_key(|entry| entry.head().weight)
            .map(|entry| SyncTarget {
                peer: entry.id(),
                head: entry.head(),
            })
    }

    fn raise_highest_known(&self, number: u64) {
        let mut status = self.inner.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.highest_known_height = status.highest_known_height.max(number);
    }
}

//---------------------------------------------------------------------------------------------------- SyncAttempt
/// One attempt at syncing with one peer.
struct SyncAttempt {
    chain: Arc<BlockChain>,
    retriever: RetrieveManager,
    config: DownloaderConfig,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    target: SyncTarget,
    state: Arc<watch::Sender<DownloaderState>>,
    /// Bumped whenever a stage makes progress, the watchdog waits on it.
    progress: watch::Sender<u64>,
}

impl SyncAttempt {
    async fn sync(&self, stalled: &AtomicBool) -> Result<(), SyncError> {
        let Some(peer) = self.retriever.distributor().peer_set().get(&self.target.peer) else {
            return Err(SyncError::Stalled);
        };
        let peer_closed = peer.client.info.handle.closed();
        drop(peer);

        let res = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SyncError::Cancelled),
            () = peer_closed => Err(SyncError::Stalled),
            res = self.watchdog(stalled) => res,
            res = self.pipeline().in_current_span() => res,
        };

        // Stops the retrievals of spawned batches.
        self.cancel.cancel();
        res
    }

    /// Fails once no progress was made for a whole stall timeout.
    async fn watchdog(&self, stalled: &AtomicBool) -> Result<(), SyncError> {
        let mut progress = self.progress.subscribe();

        loop {
            match tokio::time::timeout(self.config.stall_timeout, progress.changed()).await {
                Ok(Ok(())) => stalled.store(false, Ordering::Release),
                Ok(Err(_)) => return Err(SyncError::Cancelled),
                Err(_) => {
                    stalled.store(true, Ordering::Release);
                    return Err(SyncError::Stalled);
                }
            }
        }
    }

    async fn pipeline(&self) -> Result<(), SyncError> {
        self.set_state(DownloaderState::FindingAncestor);
        let ancestor = self.find_common_ancestor().await?;
        tracing::debug!(number = ancestor.number, "found common ancestor");
        self.made_progress();

        if ancestor.number >= self.target.head.number {
            return Ok(());
        }

        self.set_state(DownloaderState::FetchingHeaders);

        match self.config.mode {
            SyncMode::Light => self.fetch_headers(&ancestor, None).await,
            SyncMode::Full | SyncMode::Fast => {
                let pivot = self.pivot(&ancestor);
                let (batch_tx, batch_rx) =
                    tokio::sync::mpsc::channel(self.config.max_outstanding.max(1));

                tokio::try_join!(
                    self.fetch_headers(&ancestor, Some(batch_tx)),
                    self.fetch_blocks(batch_rx, ancestor.number + 1, pivot),
                )
                .map(|((), ())| ())
            }
        }
    }

    /// The fast sync pivot, [`None`] if every block is executed.
    fn pivot(&self, ancestor: &cinder_types::Header) -> Option<u64> {
        if self.config.mode != SyncMode::Fast {
            return None;
        }

        self.target
            .head
            .number
            .checked_sub(self.config.pivot_distance)
            .filter(|pivot| *pivot > ancestor.number)
    }

    fn set_state(&self, state: DownloaderState) {
        self.state.send_replace(state);
    }

    fn made_progress(&self) {
        self.progress.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Retrieves `request`, counting failed retrievals.
    async fn retrieve(&self, request: RetrieveRequest) -> Result<ProtocolResponse, SyncError> {
        retrieve(&self.retriever, &self.counters, request, &self.cancel).await
    }

    /// Penalises the sync peer for sending a chain that does not link.
    fn penalise_target(&self) {
        let distributor = self.retriever.distributor();
        distributor
            .server_pool()
            .report(self.target.peer, Outcome::InvalidResponse);
        distributor.peer_set().unregister(&self.target.peer);
    }
}

/// Retrieves `request`, counting failed retrievals.
async fn retrieve(
    retriever: &RetrieveManager,
    counters: &Counters,
    request: RetrieveRequest,
    cancel: &CancellationToken,
) -> Result<ProtocolResponse, SyncError> {
    match retriever.retrieve(request, cancel).await {
        Ok(retrieved) => Ok(retrieved.response),
        Err(e) => {
            if e != RetrieveError::Cancelled {
                Counters::add(&counters.timed_out, 1);
            }
            Err(e.into())
        }
    }
}

/// Wraps `check` so failed checks are counted as dropped responses.
fn counting_validator<F>(
    counters: &Arc<Counters>,
    check: F,
) -> impl Fn(&ProtocolResponse) -> Result<(), InvalidResponse> + Send + Sync + 'static
where
    F: Fn(&ProtocolResponse) -> Result<(), InvalidResponse> + Send + Sync + 'static,
{
    let counters = Arc::clone(counters);
    move |response| check(response).inspect_err(|_| Counters::add(&counters.dropped, 1))
}
