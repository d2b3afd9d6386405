//! # Inbound Server
//!
//! This module contains the inbound connection server, which listens for inbound connections, gives
//! them to the handshaker service and then registers successful handshakes with the [`PeerSet`].
use std::sync::Arc;

use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::sleep,
};
use tracing::{instrument, Instrument, Span};

use cinder_p2p_core::{
    client::{DoHandshakeRequest, Handshaker},
    transports::TcpInboundListener,
    ConnectionDirection, CoreSyncSvc, PeerId, ProtocolRequestHandler,
};

use crate::{
    constants::INBOUND_CONNECTION_COOL_DOWN, peer_set::PeerSet, server_pool::ServerPool,
};

/// Starts the inbound server, this function never returns.
///
/// At most `max_inbound_connections` inbound peers are connected at once, connections
/// made while full are closed straight away.
#[instrument(level = "warn", skip_all)]
pub(crate) async fn inbound_server<CS, H>(
    listener: TcpInboundListener,
    handshaker: Handshaker<CS, H>,
    peer_set: Arc<PeerSet>,
    server_pool: Arc<ServerPool>,
    max_inbound_connections: usize,
) where
    CS: CoreSyncSvc + Sync,
    H: ProtocolRequestHandler + Sync,
{
    tracing::info!("Starting inbound connection server");

    let inbound_semaphore = Arc::new(Semaphore::new(max_inbound_connections));
    let mut handshakes = JoinSet::new();

    loop {
        let (addr, peer_stream, peer_sink) = tokio::select! {
            res = listener.accept() => match res {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!("Failed to accept an inbound connection: {e}");
                    continue;
                }
            },
            Some(res) = handshakes.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        std::panic::resume_unwind(e.into_panic());
                    }
                }
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&inbound_semaphore).try_acquire_owned() else {
            tracing::debug!(%addr, "at the inbound connection limit, dropping connection");
            continue;
        };

        let peer_id = PeerId::random();
        let handshaker = handshaker.clone();
        let peer_set = Arc::clone(&peer_set);
        let server_pool = Arc::clone(&server_pool);

        handshakes.spawn(
            async move {
                let req = DoHandshakeRequest {
                    peer_id,
                    peer_stream,
                    peer_sink,
                    direction: ConnectionDirection::Inbound,
                    permit: Some(permit),
                };

                let client = match handshaker.handshake(req).await {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::debug!(%addr, "inbound handshake failed: {e}");
                        return;
                    }
                };

                match peer_set.register(client) {
                    Ok(()) => server_pool.connected(peer_id, None),
                    Err(e) => tracing::debug!("not registering inbound peer: {e}"),
                }
            }
            .instrument(Span::current()),
        );

        sleep(INBOUND_CONNECTION_COOL_DOWN).await;
    }
}
