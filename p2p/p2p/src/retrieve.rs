//! # Retrieve Manager
//!
//! The [`RetrieveManager`] owns a request from the moment it is issued until a peer
//! answered it correctly, or it has failed too often.
//!
//! Each attempt gets a peer from the [`RequestDistributor`], sends the request and races the
//! answer against a timer. The answer is checked with the request's [`Validator`] and every
//! outcome is reported to the [`ServerPool`](crate::server_pool::ServerPool). A timeout or an invalid answer is retried
//! against another peer, a peer disconnecting mid request puts the request back at the
//! front of the distributor's queue without counting as a failure.
//!
//! Identical requests that are in flight at the same time are coalesced, one task does the
//! work and every caller gets a copy of the result. A caller that gives up detaches without
//! affecting the others, the task is stopped once nobody waits for it.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::AbortHandle,
    time::{timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use cinder_helper::asynch::cancellable;
use cinder_p2p_core::{PeerError, PeerId};
use cinder_types::{borsh_hash, Hash};
use cinder_wire::{ProtocolRequest, ProtocolResponse};

use crate::{
    config::RetrieveConfig,
    constants::MAX_DISCONNECT_REQUEUES,
    distributor::{DistributorError, RequestCriteria, RequestDistributor},
    server_pool::Outcome,
};

//---------------------------------------------------------------------------------------------------- Types
/// A response failed validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid response: {0}")]
pub struct InvalidResponse(pub &'static str);

/// Checks a response against what was asked for.
pub type Validator = Arc<dyn Fn(&ProtocolResponse) -> Result<(), InvalidResponse> + Send + Sync>;

/// An error retrieving data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    #[error("no peer was available to serve the request")]
    NoPeerAvailable,
    #[error("the request failed {attempts} times")]
    RetrievalExhausted { attempts: usize },
    #[error("the request was cancelled")]
    Cancelled,
}

impl From<DistributorError> for RetrieveError {
    fn from(value: DistributorError) -> Self {
        match value {
            DistributorError::NoPeerAvailable => Self::NoPeerAvailable,
        }
    }
}

/// A request to retrieve.
#[derive(Clone)]
pub struct RetrieveRequest {
    pub request: ProtocolRequest,
    pub criteria: RequestCriteria,
    pub validator: Validator,
    /// Overrides [`RetrieveConfig::request_timeout`].
    pub timeout: Option<Duration>,
}

impl RetrieveRequest {
    pub fn new<F>(request: ProtocolRequest, criteria: RequestCriteria, validator: F) -> Self
    where
        F: Fn(&ProtocolResponse) -> Result<(), InvalidResponse> + Send + Sync + 'static,
    {
        Self {
            request,
            criteria,
            validator: Arc::new(validator),
            timeout: None,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The key identical requests are coalesced on.
    fn content_key(&self) -> Hash {
        borsh_hash(&(&self.request, self.criteria.peer.map(|peer| peer.0)))
    }
}

/// A validated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub response: ProtocolResponse,
    /// The peer that answered.
    pub peer: PeerId,
}

type RetrieveResult = Result<Retrieved, RetrieveError>;

/// Counters over every request the manager handled.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RetrieveStats {
    /// Requests issued by callers, including coalesced ones.
    pub requests: u64,
    /// Requests that joined one already in flight.
    pub coalesced: u64,
    /// Requests sent to a peer.
    pub sent: u64,
    pub timeouts: u64,
    pub invalid: u64,
    pub requeued: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    coalesced: AtomicU64,
    sent: AtomicU64,
    timeouts: AtomicU64,
    invalid: AtomicU64,
    requeued: AtomicU64,
}

impl Counters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RetrieveStats {
        RetrieveStats {
            requests: self.requests.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

/// A request being worked on, with everyone waiting for it.
struct InFlight {
    /// Tells the waiters apart from those of a newer request with the same key.
    generation: u64,
    result: watch::Receiver<Option<RetrieveResult>>,
    waiters: usize,
    abort: AbortHandle,
}

struct Inner {
    distributor: RequestDistributor,
    config: RetrieveConfig,
    in_flight: Mutex<HashMap<Hash, InFlight>>,
    next_generation: AtomicU64,
    counters: Counters,
}

//---------------------------------------------------------------------------------------------------- RetrieveManager
/// Issues requests to peers, see the [module docs](self).
#[derive(Clone)]
pub struct RetrieveManager {
    inner: Arc<Inner>,
}

impl RetrieveManager {
    pub fn new(distributor: RequestDistributor, config: RetrieveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                distributor,
                config,
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub fn distributor(&self) -> &RequestDistributor {
        &self.inner.distributor
    }

    pub fn config(&self) -> &RetrieveConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> RetrieveStats {
        self.inner.counters.snapshot()
    }

    /// Retrieves `req`, waiting until a peer answered it correctly.
    ///
    /// # Errors
    /// - [`RetrieveError::Cancelled`] if `cancel` fires first, this only detaches this caller.
    /// - [`RetrieveError::NoPeerAvailable`] if no peer could be found for an attempt.
    /// - [`RetrieveError::RetrievalExhausted`] if the retries ran out.
    pub async fn retrieve(
        &self,
        req: RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<Retrieved, RetrieveError> {
        let inner = &self.inner;
        Counters::inc(&inner.counters.requests);

        if cancel.is_cancelled() {
            return Err(RetrieveError::Cancelled);
        }

        let key = req.content_key();

        let (mut result, generation) = {
            let mut in_flight = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = in_flight.get_mut(&key) {
                Counters::inc(&inner.counters.coalesced);
                existing.waiters += 1;
                (existing.result.clone(), existing.generation)
            } else {
                let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);

                let this = self.clone();
                let handle = tokio::spawn(
                    async move {
                        let result = this.run(req).await;
                        drop(tx.send(Some(result)));
                        this.finish(key, generation);
                    }
                    .in_current_span(),
                );

                in_flight.insert(
                    key,
                    InFlight {
                        generation,
                        result: rx.clone(),
                        waiters: 1,
                        abort: handle.abort_handle(),
                    },
                );

                (rx, generation)
            }
        };

        let _waiter = WaiterGuard {
            manager: self,
            key,
            generation,
        };

        let finished = cancellable(cancel, async {
            result
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|result| result.clone())
        })
        .await;

        match finished {
            Ok(Some(result)) => result,
            // The worker stopped without a result, it was aborted.
            Ok(None) | Err(_) => Err(RetrieveError::Cancelled),
        }
    }

    /// Removes a finished request so the next identical one goes to the network again.
    fn finish(&self, key: Hash, generation: u64) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if in_flight
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            in_flight.remove(&key);
        }
    }

    /// Detaches one waiter, stopping the request if it was the last one.
    fn detach(&self, key: Hash, generation: u64) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(entry) = in_flight.get_mut(&key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        entry.waiters -= 1;
        if entry.waiters == 0 {
            if let Some(entry) = in_flight.remove(&key) {
                entry.abort.abort();
            }
        }
    }

    /// Runs attempts until one succeeds or the retries run out.
    #[instrument(level = "debug", skip_all, fields(kind = %req.request.kind()))]
    async fn run(&self, req: RetrieveRequest) -> RetrieveResult {
        let inner = &self.inner;
        let server_pool = inner.distributor.server_pool();
        let request_timeout = req.timeout.unwrap_or(inner.config.request_timeout);

        let mut criteria = req.criteria.clone();
        let mut failures = 0;
        let mut requeues = 0;
        let mut requeued = false;

        loop {
            let assignment = inner
                .distributor
                .assign(criteria.clone(), inner.config.assign_timeout, requeued)
                .await?;
            let peer = assignment.peer();
            requeued = false;

            tracing::trace!(%peer, "sending request");
            Counters::inc(&inner.counters.sent);

            let start = Instant::now();
            let res = timeout(
                request_timeout,
                assignment.client().request(req.request.clone()),
            )
            .await;

            match res {
                Ok(Ok(response)) => match (req.validator)(&response) {
                    Ok(()) => {
                        server_pool.report(
                            peer,
                            Outcome::Success {
                                latency: start.elapsed(),
                            },
                        );
                        return Ok(Retrieved { response, peer });
                    }
                    Err(e) => {
                        tracing::debug!(%peer, "{e}");
                        self.invalid_response(peer);
                        failures += 1;
                    }
                },
                Ok(Err(PeerError::PeerSentIncorrectResponse | PeerError::PeerSentInvalidMessage(_))) => {
                    tracing::debug!(%peer, "peer sent an incorrect response");
                    self.invalid_response(peer);
                    failures += 1;
                }
                Ok(Err(PeerError::ConnectionClosed | PeerError::ClientChannelClosed)) => {
                    requeues += 1;
                    Counters::inc(&inner.counters.requeued);
                    if requeues > MAX_DISCONNECT_REQUEUES {
                        return Err(RetrieveError::RetrievalExhausted {
                            attempts: failures + requeues,
                        });
                    }

                    tracing::debug!(%peer, "peer disconnected, requeueing request");
                    requeued = true;
                }
                Ok(Err(
                    e @ (PeerError::UnsupportedRequest(_)
                    | PeerError::ServiceError(_)
                    | PeerError::Wire(_)),
                )) => {
                    tracing::debug!(%peer, "request failed: {e}");
                    failures += 1;
                }
                Err(_) => {
                    tracing::debug!(%peer, "request timed out");
                    Counters::inc(&inner.counters.timeouts);
                    server_pool.report(peer, Outcome::Timeout);
                    failures += 1;
                }
            }

            criteria.avoid.insert(peer);
            drop(assignment);

            if failures > inner.config.max_retries {
                tracing::debug!(failures, "giving up on request");
                return Err(RetrieveError::RetrievalExhausted { attempts: failures });
            }
        }
    }

    /// Reports an invalid response, dropping the peer if the server pool removed it.
    fn invalid_response(&self, peer: PeerId) {
        let inner = &self.inner;
        Counters::inc(&inner.counters.invalid);

        if inner
            .distributor
            .server_pool()
            .report(peer, Outcome::InvalidResponse)
        {
            inner.distributor.peer_set().unregister(&peer);
        }
    }
}

/// Detaches a caller from its request when it stops waiting.
struct WaiterGuard<'a> {
    manager: &'a RetrieveManager,
    key: Hash,
    generation: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.manager.detach(self.key, self.generation);
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::{SinkExt, StreamExt};

    use cinder_p2p_core::PeerId;
    use cinder_test_utils::peer::{connected_client, RemotePeer};
    use cinder_types::{HashOrNumber, Header};
    use cinder_wire::{Message, PeerCapabilities, PeerResponse};

    use super::*;
    use crate::{config::DistributorConfig, peer_set::PeerSet, server_pool::ServerPool};

    fn manager(peer_set: &Arc<PeerSet>, config: RetrieveConfig) -> RetrieveManager {
        let server_pool = Arc::new(ServerPool::new(Default::default()));
        let distributor =
            RequestDistributor::new(Arc::clone(peer_set), server_pool, DistributorConfig::default());
        RetrieveManager::new(distributor, config)
    }

    fn header_request(number: u64) -> ProtocolRequest {
        ProtocolRequest::GetBlockHeaders {
            origin: HashOrNumber::Number(number),
            amount: 1,
            skip: 0,
            reverse: false,
        }
    }

    /// Answers every header request with a header at the requested height, counting requests.
    fn serve_headers(mut remote: RemotePeer, count: Arc<AtomicUsize>) {
        tokio::spawn(async move {
            while let Some(Ok(message)) = remote.stream.next().await {
                let Message::Request(req) = message else {
                    continue;
                };
                count.fetch_add(1, Ordering::SeqCst);

                let ProtocolRequest::GetBlockHeaders {
                    origin: HashOrNumber::Number(number),
                    ..
                } = req.request
                else {
                    continue;
                };

                // Give every caller the time to attach.
                tokio::time::sleep(Duration::from_millis(50)).await;

                let header = Header {
                    number,
                    ..Default::default()
                };
                if remote
                    .sink
                    .send(Message::Response(PeerResponse {
                        id: req.id,
                        response: ProtocolResponse::BlockHeaders(vec![header]),
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });
    }

    fn accept_any() -> RetrieveRequest {
        RetrieveRequest::new(header_request(5), RequestCriteria::default(), |_| Ok(()))
    }

    #[tokio::test]
    async fn identical_requests_are_coalesced() {
        let peer_set = PeerSet::new();
        let (client, remote) =
            connected_client(PeerId(1), 100, PeerCapabilities::FULL_SERVER).await;
        peer_set.register(client).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        serve_headers(remote, Arc::clone(&count));

        let manager = manager(&peer_set, RetrieveConfig::default());
        let cancel = CancellationToken::new();

        let results = futures::future::join_all(
            (0..8).map(|_| manager.retrieve(accept_any(), &cancel)),
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().peer, PeerId(1));
        }
        assert_eq!(manager.stats().coalesced, 7);
    }

    #[tokio::test]
    async fn cancelling_one_waiter_keeps_the_others() {
        let peer_set = PeerSet::new();
        let (client, remote) =
            connected_client(PeerId(1), 100, PeerCapabilities::FULL_SERVER).await;
        peer_set.register(client).unwrap();
        serve_headers(remote, Arc::new(AtomicUsize::new(0)));

        let manager = manager(&peer_set, RetrieveConfig::default());
        let cancelled = CancellationToken::new();
        let kept = CancellationToken::new();

        let a = manager.retrieve(accept_any(), &cancelled);
        let b = manager.retrieve(accept_any(), &kept);
        let cancel = async {
            tokio::task::yield_now().await;
            cancelled.cancel();
        };

        let (a, b, ()) = tokio::join!(a, b, cancel);
        assert_eq!(a, Err(RetrieveError::Cancelled));
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn invalid_responses_exhaust_retries() {
        let peer_set = PeerSet::new();
        let (client, remote) =
            connected_client(PeerId(1), 100, PeerCapabilities::FULL_SERVER).await;
        peer_set.register(client).unwrap();
        serve_headers(remote, Arc::new(AtomicUsize::new(0)));

        let manager = manager(
            &peer_set,
            RetrieveConfig {
                max_retries: 1,
                ..Default::default()
            },
        );

        let req = RetrieveRequest::new(header_request(5), RequestCriteria::default(), |_| {
            Err(InvalidResponse("never valid"))
        });
        let res = manager.retrieve(req, &CancellationToken::new()).await;

        assert_eq!(res, Err(RetrieveError::RetrievalExhausted { attempts: 2 }));
        assert_eq!(manager.stats().invalid, 2);
        assert!(
            manager
                .distributor()
                .server_pool()
                .score(&PeerId(1))
                .unwrap()
                < crate::constants::INITIAL_SCORE
        );
    }

    #[tokio::test]
    async fn disconnects_are_requeued_without_spending_a_retry() {
        let peer_set = PeerSet::new();
        let (client, mut remote) =
            connected_client(PeerId(1), 100, PeerCapabilities::FULL_SERVER).await;
        peer_set.register(client).unwrap();

        let manager = manager(
            &peer_set,
            RetrieveConfig {
                max_retries: 0,
                assign_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let retrieve = manager.retrieve(accept_any(), &cancel);
        let churn = async {
            // Peer 1 takes the request and then goes away.
            let Some(Ok(Message::Request(_))) = remote.stream.next().await else {
                panic!("expected a request");
            };
            drop(remote);

            let (client, remote) =
                connected_client(PeerId(2), 100, PeerCapabilities::FULL_SERVER).await;
            serve_headers(remote, Arc::new(AtomicUsize::new(0)));
            peer_set.register(client).unwrap();
        };

        let (res, ()) = tokio::join!(retrieve, churn);

        assert_eq!(res.unwrap().peer, PeerId(2));
        let stats = manager.stats();
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.timeouts, 0);
    }

    #[tokio::test]
    async fn no_peers_fails_with_no_peer_available() {
        let peer_set = PeerSet::new();
        let manager = manager(
            &peer_set,
            RetrieveConfig {
                assign_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let res = manager
            .retrieve(accept_any(), &CancellationToken::new())
            .await;
        assert_eq!(res, Err(RetrieveError::NoPeerAvailable));
    }
}
