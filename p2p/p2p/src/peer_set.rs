//! # Peer Set
//!
//! The [`PeerSet`] is the registry of every connected peer. Every other component finds
//! peers through it by [`PeerId`], nothing else holds on to a [`Client`] for longer than
//! one request.
//!
//! Reads hand out snapshots ([`Arc<PeerEntry>`]s), so callers never hold the registry's
//! locks while talking to a peer.
//!
//! Internally the set is a [`DashMap`] which means care should be taken in `async` code
//! as internally this uses blocking `RwLock`s.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Weak,
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{stream::FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, Span};

use cinder_p2p_core::{client::Client, handles::ConnectionHandle, PeerId};
use cinder_types::HeadInfo;
use cinder_wire::PeerCapabilities;

/// An error registering a peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerSetError {
    #[error("peer {0} is already registered")]
    AlreadyRegistered(PeerId),
    #[error("peer {0} disconnected before it was registered")]
    AlreadyClosed(PeerId),
}

/// A registered peer.
#[derive(Debug)]
pub struct PeerEntry {
    pub client: Client,
    /// Requests assigned to this peer that have not finished.
    pub(crate) in_flight: AtomicUsize,
}

impl PeerEntry {
    pub const fn id(&self) -> PeerId {
        self.client.info.id
    }

    pub fn head(&self) -> HeadInfo {
        self.client.head()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// The registry of connected peers.
///
/// See the [module docs](self) for more.
pub struct PeerSet {
    peers: DashMap<PeerId, Arc<PeerEntry>>,
    /// Ticks whenever a peer is added or removed.
    changes: watch::Sender<()>,
    /// A channel to send new peers down to monitor for disconnect.
    new_connection_tx: mpsc::UnboundedSender<(ConnectionHandle, PeerId)>,
}

impl PeerSet {
    /// Returns a new [`PeerSet`] wrapped in an [`Arc`].
    ///
    /// This spawns the task that unregisters peers when their connection closes, so
    /// it must be called inside a tokio runtime.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let set = Arc::new(Self {
            peers: DashMap::new(),
            changes: watch::Sender::new(()),
            new_connection_tx: tx,
        });

        tokio::spawn(disconnect_monitor(rx, Arc::downgrade(&set)).instrument(Span::current()));

        set
    }

    /// Adds a connected peer.
    ///
    /// # Errors
    /// - [`PeerSetError::AlreadyRegistered`] if a peer with the same id is registered.
    /// - [`PeerSetError::AlreadyClosed`] if the connection closed already.
    pub fn register(&self, client: Client) -> Result<(), PeerSetError> {
        let id = client.id();
        let handle = client.info.handle.clone();

        if handle.is_closed() {
            return Err(PeerSetError::AlreadyClosed(id));
        }

        match self.peers.entry(id) {
            Entry::Occupied(_) => return Err(PeerSetError::AlreadyRegistered(id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(PeerEntry {
                    client,
                    in_flight: AtomicUsize::new(0),
                }));
            }
        }

        tracing::debug!(peer = %id, "registered peer");

        // The monitor can only be gone if the set is being dropped.
        drop(self.new_connection_tx.send((handle, id)));
        self.changes.send_replace(());

        Ok(())
    }

    /// Removes a peer and closes its connection.
    ///
    /// Requests in flight to the peer fail and are handed back to the distributor.
    /// Unregistering an unknown peer does nothing.
    ///
    /// Returns `true` if the peer was registered.
    pub fn unregister(&self, id: &PeerId) -> bool {
        let Some((_, entry)) = self.peers.remove(id) else {
            return false;
        };

        tracing::debug!(peer = %id, "unregistered peer");
        entry.client.disconnect();
        self.changes.send_replace(());

        true
    }

    /// Removes the peer only if its connection is closed, returns `true` if it was removed.
    fn remove_closed(&self, id: &PeerId) -> bool {
        let removed = self
            .peers
            .remove_if(id, |_, entry| entry.client.is_closed())
            .is_some();

        if removed {
            tracing::debug!(peer = %id, "peer disconnected");
            self.changes.send_replace(());
        }

        removed
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<PeerEntry>> {
        self.peers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// A snapshot of every peer that advertises all of `capabilities`.
    pub fn peers_with_capability(&self, capabilities: PeerCapabilities) -> Vec<Arc<PeerEntry>> {
        self.peers
            .iter()
            .filter(|entry| entry.client.info.capabilities.contains(capabilities))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// A snapshot of every peer.
    pub fn peers(&self) -> Vec<Arc<PeerEntry>> {
        self.peers_with_capability(PeerCapabilities::empty())
    }

    /// The peer with the heaviest advertised head.
    pub fn best_peer(&self) -> Option<Arc<PeerEntry>> {
        self.peers
            .iter()
            .filter(|entry| !entry.client.is_closed())
            .max_by_key(|entry| entry.head().weight)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// A receiver that is notified whenever a peer is added or removed.
    pub fn subscribe_changes(&self) -> watch::Receiver<()> {
        self.changes.subscribe()
    }
}

/// Removes peers from the set as their connections close.
async fn disconnect_monitor(
    mut new_connection_rx: mpsc::UnboundedReceiver<(ConnectionHandle, PeerId)>,
    peer_set: Weak<PeerSet>,
) {
    let mut closed = FuturesUnordered::new();

    loop {
        tokio::select! {
            Some((handle, id)) = new_connection_rx.recv() => {
                closed.push(async move {
                    handle.closed().await;
                    id
                });
            }
            Some(id) = closed.next() => {
                let Some(peer_set) = peer_set.upgrade() else {
                    return;
                };
                peer_set.remove_closed(&id);
            }
            else => {
                tracing::debug!("peer set dropped, stopping disconnect monitor");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cinder_test_utils::peer::connected_client;

    use super::*;

    #[tokio::test]
    async fn register_twice_fails() {
        let set = PeerSet::new();
        let (client, _remote) = connected_client(PeerId(1), 10, PeerCapabilities::FULL_SERVER).await;

        set.register(client.clone()).unwrap();
        assert_eq!(
            set.register(client),
            Err(PeerSetError::AlreadyRegistered(PeerId(1)))
        );
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let set = PeerSet::new();
        let (client, _remote) = connected_client(PeerId(1), 10, PeerCapabilities::FULL_SERVER).await;

        set.register(client.clone()).unwrap();
        assert!(set.unregister(&PeerId(1)));
        assert!(!set.unregister(&PeerId(1)));
        assert!(set.is_empty());
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn closed_connections_are_removed() {
        let set = PeerSet::new();
        let mut changes = set.subscribe_changes();
        let (client, remote) = connected_client(PeerId(1), 10, PeerCapabilities::FULL_SERVER).await;

        set.register(client).unwrap();
        changes.borrow_and_update();
        drop(remote);

        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!set.contains(&PeerId(1)));
    }

    #[tokio::test]
    async fn best_peer_and_capabilities() {
        let set = PeerSet::new();
        let (light, _r1) = connected_client(PeerId(1), 50, PeerCapabilities::LIGHT_SERVER).await;
        let (full, _r2) = connected_client(PeerId(2), 20, PeerCapabilities::FULL_SERVER).await;

        set.register(light).unwrap();
        set.register(full).unwrap();

        assert_eq!(set.best_peer().unwrap().id(), PeerId(1));

        let full_servers = set.peers_with_capability(PeerCapabilities::FULL_SERVER);
        assert_eq!(full_servers.len(), 1);
        assert_eq!(full_servers[0].id(), PeerId(2));
        assert_eq!(set.peers().len(), 2);
    }
}
