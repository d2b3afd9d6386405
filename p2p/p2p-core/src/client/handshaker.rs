//! Handshake Module
//!
//! This module contains the [`Handshaker`] which takes an open connection, exchanges
//! [`Status`] messages with the peer and, if the peer is on our chain, spawns the
//! connection task and returns a [`Client`].

use std::sync::{Arc, Mutex};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::{mpsc, OwnedSemaphorePermit},
    time::timeout,
};
use tower::ServiceExt;
use tracing::{info_span, Instrument, Span};

use cinder_types::Hash;
use cinder_wire::{Message, PeerCapabilities, ProtocolVersion, Status, WireError};

use crate::{
    client::{connection::Connection, Client, PeerInformation},
    constants::{CLIENT_QUEUE_SIZE, HANDSHAKE_TIMEOUT},
    handles::HandleBuilder,
    ConnectionDirection, CoreSyncDataRequest, CoreSyncSvc, HandshakeError, PeerAnnouncement,
    PeerId, ProtocolRequestHandler, SharedError,
};

/// The static parts of the [`Status`] we send.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OurNodeInfo {
    pub network_id: u64,
    pub genesis: Hash,
    pub version: ProtocolVersion,
    pub capabilities: PeerCapabilities,
}

/// A request to complete a handshake.
pub struct DoHandshakeRequest<Str, Snk> {
    /// The id the peer will be known by.
    pub peer_id: PeerId,
    /// The receiving side of the connection.
    pub peer_stream: Str,
    /// The sending side of the connection.
    pub peer_sink: Snk,
    /// The direction of the connection.
    pub direction: ConnectionDirection,
    /// An [`Option`]al permit for this connection.
    pub permit: Option<OwnedSemaphorePermit>,
}

/// The peer handshaking service.
#[derive(Debug, Clone)]
pub struct Handshaker<CSync, H> {
    our_info: OurNodeInfo,
    /// Returns our current head.
    core_sync_svc: CSync,
    /// Answers the requests of every peer we handshake with.
    request_handler: H,
    /// Where every connection sends the announcements it receives.
    announcement_tx: mpsc::Sender<PeerAnnouncement>,

    connection_parent_span: Span,
}

impl<CSync, H> Handshaker<CSync, H>
where
    CSync: CoreSyncSvc,
    H: ProtocolRequestHandler,
{
    pub fn new(
        our_info: OurNodeInfo,
        core_sync_svc: CSync,
        request_handler: H,
        announcement_tx: mpsc::Sender<PeerAnnouncement>,
    ) -> Self {
        Self {
            our_info,
            core_sync_svc,
            request_handler,
            announcement_tx,
            connection_parent_span: Span::current(),
        }
    }

    pub const fn our_info(&self) -> &OurNodeInfo {
        &self.our_info
    }

    /// Completes a handshake with a peer, spawning its connection task.
    ///
    /// # Errors
    /// Fails if the peer is on another network or chain, sends anything other than a
    /// [`Status`] first, or does not answer within [`HANDSHAKE_TIMEOUT`].
    pub async fn handshake<Str, Snk>(
        &self,
        req: DoHandshakeRequest<Str, Snk>,
    ) -> Result<Client, HandshakeError>
    where
        Str: Stream<Item = Result<Message, WireError>> + Unpin + Send + 'static,
        Snk: Sink<Message, Error = WireError> + Unpin + Send + 'static,
    {
        let span = info_span!("handshaker", peer = %req.peer_id);

        let mut core_sync_svc = self.core_sync_svc.clone();
        let our_info = self.our_info;

        let fut = async move {
            let DoHandshakeRequest {
                peer_id,
                mut peer_stream,
                mut peer_sink,
                direction,
                permit,
            } = req;

            let head = core_sync_svc
                .ready()
                .await?
                .call(CoreSyncDataRequest)
                .await?;

            let our_status = Status {
                version: our_info.version,
                network_id: our_info.network_id,
                genesis: our_info.genesis,
                head,
                capabilities: our_info.capabilities,
            };

            tracing::trace!("sending status");
            peer_sink.send(Message::Status(our_status)).await?;

            let their_status = match peer_stream.next().await {
                Some(Ok(Message::Status(status))) => status,
                Some(Ok(_)) => {
                    return Err(HandshakeError::PeerSentInvalidMessage(
                        "first message was not a status",
                    ))
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(HandshakeError::ConnectionClosed),
            };

            if their_status.network_id != our_info.network_id {
                return Err(HandshakeError::IncorrectNetwork);
            }
            if their_status.genesis != our_info.genesis {
                return Err(HandshakeError::IncorrectGenesis);
            }

            let version = our_info.version.min(their_status.version);

            tracing::debug!(
                ?version,
                head = their_status.head.number,
                capabilities = ?their_status.capabilities,
                "handshake complete"
            );

            Ok((peer_id, peer_stream, peer_sink, direction, permit, version, their_status))
        };

        let (peer_id, peer_stream, peer_sink, direction, permit, version, their_status) =
            timeout(HANDSHAKE_TIMEOUT, fut.instrument(span)).await??;

        let (connection_guard, handle) = HandleBuilder::new().with_permit(permit).build();
        let (connection_tx, client_rx) = mpsc::channel(CLIENT_QUEUE_SIZE);
        let error = SharedError::new();

        let info = PeerInformation {
            id: peer_id,
            direction,
            version,
            capabilities: their_status.capabilities,
            handle,
            head: Arc::new(Mutex::new(their_status.head)),
        };

        let connection = Connection::new(
            peer_sink,
            client_rx,
            self.request_handler.clone(),
            self.announcement_tx.clone(),
            info.clone(),
            connection_guard,
            error.clone(),
        );

        let connection_span = info_span!(parent: &self.connection_parent_span, "connection", peer = %peer_id);
        tokio::spawn(connection.run(peer_stream).instrument(connection_span));

        Ok(Client::new(info, connection_tx, error))
    }
}
