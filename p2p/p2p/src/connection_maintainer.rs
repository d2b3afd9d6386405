//! Outbound Connection Maintainer.
//!
//! This module handles maintaining the number of outbound connections defined in the [`P2PConfig`].
//! Servers to dial come from the [`ServerPool`], best scored first, skipping any still
//! backing off from a failed dial.
use std::{net::SocketAddr, sync::Arc};

use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{instrument, Instrument, Span};

use cinder_helper::time::current_unix_timestamp;
use cinder_p2p_core::{
    client::{DoHandshakeRequest, Handshaker},
    transports::connect_tcp,
    ConnectionDirection, CoreSyncSvc, HandshakeError, PeerId, ProtocolRequestHandler,
};

use crate::{
    config::P2PConfig,
    constants::{OUTBOUND_CONNECTION_CHECK_INTERVAL, OUTBOUND_CONNECT_TIMEOUT},
    peer_set::PeerSet,
    server_pool::ServerPool,
};

/// An error dialing a server.
#[derive(Debug, thiserror::Error)]
enum DialError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// The outbound connection count keeper.
///
/// This handles maintaining a minimum number of connections.
pub(crate) struct OutboundConnectionKeeper<CS, H> {
    handshaker: Handshaker<CS, H>,
    peer_set: Arc<PeerSet>,
    server_pool: Arc<ServerPool>,
    /// A semaphore to keep the amount of outbound peers constant.
    outbound_semaphore: Arc<Semaphore>,
    /// Dials that have not finished, with the id of the dialed server.
    dials: JoinSet<(PeerId, Result<(), DialError>)>,
}

impl<CS, H> OutboundConnectionKeeper<CS, H>
where
    CS: CoreSyncSvc + Sync,
    H: ProtocolRequestHandler + Sync,
{
    pub(crate) fn new(
        config: &P2PConfig,
        handshaker: Handshaker<CS, H>,
        peer_set: Arc<PeerSet>,
        server_pool: Arc<ServerPool>,
    ) -> Self {
        for addr in &config.bootnodes {
            server_pool.add_known(PeerId::from_addr(addr), *addr);
        }

        Self {
            handshaker,
            peer_set,
            server_pool,
            outbound_semaphore: Arc::new(Semaphore::new(config.outbound_connections)),
            dials: JoinSet::new(),
        }
    }

    /// Starts dials with the free outbound permits.
    fn fill_permits(&mut self) {
        let now = current_unix_timestamp();

        for (id, addr) in self.server_pool.dial_candidates(now) {
            if self.peer_set.contains(&id) {
                continue;
            }

            let Ok(permit) = Arc::clone(&self.outbound_semaphore).try_acquire_owned() else {
                return;
            };

            // Cleared by `connected` if the dial succeeds.
            self.server_pool.dial_failed(id, now);

            tracing::debug!(peer = %id, %addr, "dialing server");

            let handshaker = self.handshaker.clone();
            let peer_set = Arc::clone(&self.peer_set);
            self.dials.spawn(
                async move {
                    let res = connect_to_outbound_peer(&handshaker, &peer_set, id, addr, permit)
                        .await;
                    (id, res)
                }
                .instrument(Span::current()),
            );
        }
    }

    fn handle_dial_result(&self, id: PeerId, res: Result<(), DialError>) {
        match res {
            Ok(()) => self.server_pool.connected(id, None),
            Err(e) => {
                tracing::debug!(peer = %id, "dial failed: {e}");
                self.server_pool.dial_failed(id, current_unix_timestamp());
            }
        }
    }

    /// Runs the outbound connection count keeper.
    #[instrument(level = "info", name = "outbound_connections", skip_all)]
    pub(crate) async fn run(mut self) {
        tracing::info!(
            "Starting outbound connection maintainer, target outbound connections: {}",
            self.outbound_semaphore.available_permits()
        );

        let mut check_interval = interval(OUTBOUND_CONNECTION_CHECK_INTERVAL);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = check_interval.tick() => self.fill_permits(),
                Some(res) = self.dials.join_next() => {
                    let (id, res) = match res {
                        Ok(res) => res,
                        Err(e) => std::panic::resume_unwind(e.into_panic()),
                    };
                    self.handle_dial_result(id, res);
                }
            }
        }
    }
}

/// Connects to a given outbound peer and registers it.
///
/// The permit is held by the connection until it closes.
#[instrument(level = "info", skip_all, fields(%addr))]
async fn connect_to_outbound_peer<CS, H>(
    handshaker: &Handshaker<CS, H>,
    peer_set: &PeerSet,
    peer_id: PeerId,
    addr: SocketAddr,
    permit: OwnedSemaphorePermit,
) -> Result<(), DialError>
where
    CS: CoreSyncSvc + Sync,
    H: ProtocolRequestHandler + Sync,
{
    let (peer_stream, peer_sink) = timeout(OUTBOUND_CONNECT_TIMEOUT, connect_tcp(addr))
        .await
        .map_err(|_| DialError::ConnectTimeout)??;

    let client = handshaker
        .handshake(DoHandshakeRequest {
            peer_id,
            peer_stream,
            peer_sink,
            direction: ConnectionDirection::Outbound,
            permit: Some(permit),
        })
        .await?;

    if let Err(e) = peer_set.register(client) {
        tracing::debug!("not registering outbound peer: {e}");
    }

    Ok(())
}
