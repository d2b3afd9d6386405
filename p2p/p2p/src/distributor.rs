//! # Request Distributor
//!
//! The [`RequestDistributor`] hands out peers to requests. A request describes the peer it
//! needs with [`RequestCriteria`] and waits in a queue until a matching peer has room for
//! another request, the [`PeerAssignment`] it gets holds that room until it is dropped.
//!
//! Whenever a request finishes, or a peer joins or leaves the [`PeerSet`], the queue is
//! walked front to back and every request that can be served is assigned. Among the
//! matching peers the one with the fewest requests in flight wins, ties go to the higher
//! [`ServerPool`] score.
use std::{
    collections::{HashSet, VecDeque},
    sync::{atomic::Ordering, Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{
    sync::oneshot,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{Instrument, Span};

use cinder_p2p_core::{client::Client, PeerId};
use cinder_wire::{PeerCapabilities, ProtocolVersion};

use crate::{
    config::DistributorConfig,
    peer_set::{PeerEntry, PeerSet},
    server_pool::ServerPool,
};

/// The interval the queue is re-checked at even without a peer set change, peers' heads
/// move with their announcements.
const REDISTRIBUTE_INTERVAL: Duration = Duration::from_secs(1);

/// An error getting a peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DistributorError {
    #[error("no peer was available before the deadline")]
    NoPeerAvailable,
}

/// What a peer needs to serve a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCriteria {
    /// Capabilities the peer must advertise.
    pub capabilities: PeerCapabilities,
    /// The oldest protocol version that can carry the request.
    pub min_version: ProtocolVersion,
    /// The lowest head the peer must have advertised.
    pub min_number: Option<u64>,
    /// Only this peer may serve the request.
    pub peer: Option<PeerId>,
    /// Peers only used if no other peer matches, the peers that failed this request before.
    pub avoid: HashSet<PeerId>,
}

impl Default for RequestCriteria {
    fn default() -> Self {
        Self {
            capabilities: PeerCapabilities::empty(),
            min_version: ProtocolVersion::V1,
            min_number: None,
            peer: None,
            avoid: HashSet::new(),
        }
    }
}

impl RequestCriteria {
    /// Any peer that serves full blocks.
    pub fn full_server() -> Self {
        Self {
            capabilities: PeerCapabilities::FULL_SERVER,
            ..Default::default()
        }
    }

    /// A peer that serves proofs to light clients.
    pub fn light_server() -> Self {
        Self {
            capabilities: PeerCapabilities::LIGHT_SERVER,
            min_version: ProtocolVersion::V2,
            ..Default::default()
        }
    }

    /// Only `peer`.
    pub fn peer(peer: PeerId) -> Self {
        Self {
            peer: Some(peer),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_min_number(mut self, number: u64) -> Self {
        self.min_number = Some(number);
        self
    }

    fn matches(&self, entry: &PeerEntry) -> bool {
        let info = &entry.client.info;

        !info.handle.is_closed()
            && self.peer.is_none_or(|peer| peer == info.id)
            && info.capabilities.contains(self.capabilities)
            && info.version >= self.min_version
            && self
                .min_number
                .is_none_or(|number| entry.head().number >= number)
    }
}

/// A request waiting for a peer.
struct Waiter {
    criteria: RequestCriteria,
    tx: oneshot::Sender<PeerAssignment>,
}

struct DistributorState {
    queue: VecDeque<Waiter>,
    in_flight_total: usize,
}

struct Inner {
    peer_set: Arc<PeerSet>,
    server_pool: Arc<ServerPool>,
    config: DistributorConfig,
    state: Mutex<DistributorState>,
}

/// Matches requests to peers.
///
/// See the [module docs](self) for more.
#[derive(Clone)]
pub struct RequestDistributor {
    inner: Arc<Inner>,
}

impl RequestDistributor {
    /// Creates the distributor and spawns the task redistributing on peer set changes.
    pub fn new(
        peer_set: Arc<PeerSet>,
        server_pool: Arc<ServerPool>,
        config: DistributorConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            peer_set,
            server_pool,
            config,
            state: Mutex::new(DistributorState {
                queue: VecDeque::new(),
                in_flight_total: 0,
            }),
        });

        tokio::spawn(redistribute_task(Arc::downgrade(&inner)).instrument(Span::current()));

        Self { inner }
    }

    pub fn peer_set(&self) -> &Arc<PeerSet> {
        &self.inner.peer_set
    }

    pub fn server_pool(&self) -> &Arc<ServerPool> {
        &self.inner.server_pool
    }

    /// Requests waiting for a peer.
    pub fn queued(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Requests assigned to a peer that have not finished.
    pub fn in_flight(&self) -> usize {
        self.inner.lock_state().in_flight_total
    }

    /// Waits for a peer matching `criteria` with room for another request.
    ///
    /// A `requeued` request goes to the front of the queue, this is for requests whose
    /// peer disconnected before answering.
    ///
    /// # Errors
    /// Returns [`DistributorError::NoPeerAvailable`] if no peer was assigned within `deadline`.
    pub async fn assign(
        &self,
        criteria: RequestCriteria,
        deadline: Duration,
        requeued: bool,
    ) -> Result<PeerAssignment, DistributorError> {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.inner.lock_state();
            let waiter = Waiter { criteria, tx };
            if requeued {
                state.queue.push_front(waiter);
            } else {
                state.queue.push_back(waiter);
            }
        }

        self.inner.distribute();

        match timeout(deadline, rx).await {
            Ok(Ok(assignment)) => Ok(assignment),
            Ok(Err(_)) | Err(_) => {
                // The waiter is cleared from the queue on the next distribution, an
                // assignment that raced the deadline is released when `rx` drops.
                Err(DistributorError::NoPeerAvailable)
            }
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, DistributorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks the best peer for `criteria`, or [`None`] if every matching peer is busy.
    fn select(&self, criteria: &RequestCriteria) -> Option<Arc<PeerEntry>> {
        let candidates = match criteria.peer {
            Some(id) => self.peer_set.get(&id).into_iter().collect(),
            None => self.peer_set.peers_with_capability(criteria.capabilities),
        };

        candidates
            .into_iter()
            .filter(|entry| {
                criteria.matches(entry)
                    && entry.in_flight() < self.config.max_in_flight_per_peer
                    && self.server_pool.is_eligible(&entry.id())
            })
            .map(|entry| {
                let avoided = criteria.avoid.contains(&entry.id());
                let score = self.server_pool.rank_score(&entry.id());
                (avoided, entry.in_flight(), score, entry)
            })
            .min_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(b.2.total_cmp(&a.2))
            })
            .map(|(_, _, _, entry)| entry)
    }

    /// Walks the queue, assigning every request that can be served.
    fn distribute(self: &Arc<Self>) {
        let mut undelivered = Vec::new();

        {
            let mut state = self.lock_state();
            state.queue.retain(|waiter| !waiter.tx.is_closed());

            let mut i = 0;
            while i < state.queue.len() {
                if state.in_flight_total >= self.config.max_in_flight_total {
                    break;
                }

                let Some(entry) = self.select(&state.queue[i].criteria) else {
                    i += 1;
                    continue;
                };

                let waiter = state.queue.remove(i).expect("index is in bounds");

                entry.in_flight.fetch_add(1, Ordering::AcqRel);
                state.in_flight_total += 1;

                let assignment = PeerAssignment {
                    entry,
                    distributor: Arc::downgrade(self),
                };

                if let Err(assignment) = waiter.tx.send(assignment) {
                    undelivered.push(assignment);
                }
            }
        }

        // Released outside the lock, releasing distributes again.
        drop(undelivered);
    }

    fn release(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            state.in_flight_total = state.in_flight_total.saturating_sub(1);
        }
        self.distribute();
    }
}

/// Re-walks the queue whenever the peer set changes, and on an interval.
async fn redistribute_task(inner: Weak<Inner>) {
    let Some(mut changes) = inner.upgrade().map(|inner| inner.peer_set.subscribe_changes()) else {
        return;
    };

    let mut tick = interval(REDISTRIBUTE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            res = changes.changed() => {
                if res.is_err() {
                    return;
                }
            }
            _ = tick.tick() => (),
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.distribute();
    }
}

/// A peer assigned to one request.
///
/// The peer's request slot is freed when this is dropped.
pub struct PeerAssignment {
    entry: Arc<PeerEntry>,
    distributor: Weak<Inner>,
}

impl PeerAssignment {
    pub fn peer(&self) -> PeerId {
        self.entry.id()
    }

    pub fn client(&self) -> &Client {
        &self.entry.client
    }
}

impl Drop for PeerAssignment {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);

        if let Some(inner) = self.distributor.upgrade() {
            inner.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use cinder_test_utils::peer::connected_client;

    use super::*;

    async fn setup(
        peers: &[(u64, PeerCapabilities)],
        config: DistributorConfig,
    ) -> (RequestDistributor, Vec<cinder_test_utils::peer::RemotePeer>) {
        let peer_set = PeerSet::new();
        let server_pool = Arc::new(ServerPool::new(Default::default()));

        let mut remotes = Vec::new();
        for (id, caps) in peers {
            let (client, remote) = connected_client(PeerId(*id), 100, *caps).await;
            peer_set.register(client).unwrap();
            remotes.push(remote);
        }

        (
            RequestDistributor::new(peer_set, server_pool, config),
            remotes,
        )
    }

    #[tokio::test]
    async fn least_busy_peer_wins() {
        let (distributor, _remotes) = setup(
            &[
                (1, PeerCapabilities::FULL_SERVER),
                (2, PeerCapabilities::FULL_SERVER),
            ],
            DistributorConfig::default(),
        )
        .await;

        let a = distributor
            .assign(RequestCriteria::full_server(), Duration::from_secs(1), false)
            .await
            .unwrap();
        let b = distributor
            .assign(RequestCriteria::full_server(), Duration::from_secs(1), false)
            .await
            .unwrap();

        assert_ne!(a.peer(), b.peer());
        assert_eq!(distributor.in_flight(), 2);

        drop(a);
        drop(b);
        assert_eq!(distributor.in_flight(), 0);
    }

    #[tokio::test]
    async fn capability_is_required() {
        let (distributor, _remotes) = setup(
            &[(1, PeerCapabilities::LIGHT_SERVER)],
            DistributorConfig::default(),
        )
        .await;

        let res = distributor
            .assign(
                RequestCriteria::full_server(),
                Duration::from_millis(50),
                false,
            )
            .await;
        assert!(matches!(res, Err(DistributorError::NoPeerAvailable)));
    }

    #[tokio::test]
    async fn queued_request_waits_for_a_free_slot() {
        let (distributor, _remotes) = setup(
            &[(1, PeerCapabilities::FULL_SERVER)],
            DistributorConfig {
                max_in_flight_per_peer: 1,
                ..Default::default()
            },
        )
        .await;

        let first = distributor
            .assign(RequestCriteria::full_server(), Duration::from_secs(1), false)
            .await
            .unwrap();

        let d = distributor.clone();
        let second = tokio::spawn(async move {
            d.assign(RequestCriteria::full_server(), Duration::from_secs(5), false)
                .await
                .map(|a| a.peer())
        });

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(first);
        assert_eq!(second.await.unwrap(), Ok(PeerId(1)));
    }

    #[tokio::test]
    async fn avoided_peers_are_used_last() {
        let (distributor, _remotes) = setup(
            &[
                (1, PeerCapabilities::FULL_SERVER),
                (2, PeerCapabilities::FULL_SERVER),
            ],
            DistributorConfig::default(),
        )
        .await;

        let mut criteria = RequestCriteria::full_server();
        criteria.avoid.insert(PeerId(1));

        let a = distributor
            .assign(criteria.clone(), Duration::from_secs(1), false)
            .await
            .unwrap();
        assert_eq!(a.peer(), PeerId(2));

        criteria.avoid.insert(PeerId(2));
        let b = distributor
            .assign(criteria, Duration::from_secs(1), false)
            .await
            .unwrap();
        assert_eq!(b.peer(), PeerId(1));
    }

    #[tokio::test]
    async fn removed_servers_are_not_assigned() {
        let (distributor, _remotes) = setup(
            &[(1, PeerCapabilities::FULL_SERVER)],
            DistributorConfig::default(),
        )
        .await;

        for _ in 0..3 {
            distributor
                .server_pool()
                .report(PeerId(1), crate::server_pool::Outcome::InvalidResponse);
        }

        let res = distributor
            .assign(RequestCriteria::peer(PeerId(1)), Duration::from_millis(50), false)
            .await;
        assert!(matches!(res, Err(DistributorError::NoPeerAvailable)));
    }
}
