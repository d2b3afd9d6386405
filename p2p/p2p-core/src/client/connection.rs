//! The connection task.
//!
//! One of these runs per connected peer, it owns the sink half of the connection and
//! routes every message in both directions.

use std::collections::BTreeMap;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tower::ServiceExt;

use cinder_types::HeadInfo;
use cinder_wire::{
    Message, PeerRequest, PeerResponse, ProtocolRequest, ProtocolResponse, RequestKind, WireError,
};

use crate::{
    client::PeerInformation, handles::ConnectionGuard, Announcement, PeerAnnouncement, PeerError,
    ProtocolRequestHandler, SharedError,
};

/// A message from a [`Client`](crate::client::Client) to the connection task.
pub(crate) enum ConnectionTaskRequest {
    Request {
        request: ProtocolRequest,
        response_channel: oneshot::Sender<Result<ProtocolResponse, PeerError>>,
    },
    Announce(Message),
}

/// A request sent to the peer that has not been answered.
struct PendingRequest {
    kind: RequestKind,
    max_len: usize,
    response_channel: oneshot::Sender<Result<ProtocolResponse, PeerError>>,
}

pub(crate) struct Connection<Snk, H> {
    peer_sink: Snk,
    client_rx: mpsc::Receiver<ConnectionTaskRequest>,

    pending: BTreeMap<u64, PendingRequest>,
    next_id: u64,

    request_handler: H,
    announcement_tx: mpsc::Sender<PeerAnnouncement>,

    info: PeerInformation,
    connection_guard: ConnectionGuard,
    error: SharedError<PeerError>,
}

impl<Snk, H> Connection<Snk, H>
where
    Snk: Sink<Message, Error = WireError> + Unpin,
    H: ProtocolRequestHandler,
{
    pub(crate) fn new(
        peer_sink: Snk,
        client_rx: mpsc::Receiver<ConnectionTaskRequest>,
        request_handler: H,
        announcement_tx: mpsc::Sender<PeerAnnouncement>,
        info: PeerInformation,
        connection_guard: ConnectionGuard,
        error: SharedError<PeerError>,
    ) -> Self {
        Self {
            peer_sink,
            client_rx,
            pending: BTreeMap::new(),
            next_id: 0,
            request_handler,
            announcement_tx,
            info,
            connection_guard,
            error,
        }
    }

    async fn handle_client_request(&mut self, req: ConnectionTaskRequest) -> Result<(), PeerError> {
        match req {
            ConnectionTaskRequest::Request {
                request,
                response_channel,
            } => {
                // Callers that gave up (timed out) dropped their receiver.
                self.pending.retain(|_, p| !p.response_channel.is_closed());

                let id = self.next_id;
                self.next_id += 1;

                self.pending.insert(
                    id,
                    PendingRequest {
                        kind: request.kind(),
                        max_len: request.len(),
                        response_channel,
                    },
                );

                tracing::trace!(id, kind = %request.kind(), "sending request to peer");
                self.peer_sink
                    .send(Message::Request(PeerRequest { id, request }))
                    .await?;
            }
            ConnectionTaskRequest::Announce(message) => {
                self.peer_sink.send(message).await?;
            }
        }

        Ok(())
    }

    async fn handle_peer_message(&mut self, message: Message) -> Result<(), PeerError> {
        match message {
            Message::Request(PeerRequest { id, request }) => {
                if request.kind().min_version() > self.info.version {
                    return Err(PeerError::PeerSentInvalidMessage(
                        "request not supported by the negotiated version",
                    ));
                }

                let kind = request.kind();
                match self.request_handler.ready().await?.call(request).await {
                    Ok(response) if response.kind() == kind => {
                        self.peer_sink
                            .send(Message::Response(PeerResponse { id, response }))
                            .await?;
                    }
                    Ok(_) => tracing::warn!(%kind, "request handler returned the wrong response kind"),
                    Err(e) => tracing::debug!(%kind, "not answering peer request: {e}"),
                }
            }
            Message::Response(PeerResponse { id, response }) => {
                let Some(pending) = self.pending.remove(&id) else {
                    tracing::trace!(id, "response to a request nobody waits for");
                    return Ok(());
                };

                if pending.kind != response.kind() || response.len() > pending.max_len {
                    drop(
                        pending
                            .response_channel
                            .send(Err(PeerError::PeerSentIncorrectResponse)),
                    );
                    return Err(PeerError::PeerSentIncorrectResponse);
                }

                drop(pending.response_channel.send(Ok(response)));
            }
            Message::NewBlockHashes(hashes) => {
                if let Some(best) = hashes.iter().max_by_key(|a| a.weight) {
                    self.info.update_head(HeadInfo {
                        hash: best.hash,
                        number: best.number,
                        weight: best.weight,
                    });
                }
                self.forward(Announcement::Hashes(hashes));
            }
            Message::NewBlock(new_block) => {
                self.info.update_head(HeadInfo {
                    hash: new_block.block.hash(),
                    number: new_block.block.number(),
                    weight: new_block.weight,
                });
                self.forward(Announcement::Block(new_block));
            }
            Message::Status(_) => {
                return Err(PeerError::PeerSentInvalidMessage("status after the handshake"));
            }
        }

        Ok(())
    }

    fn forward(&self, announcement: Announcement) {
        if self
            .announcement_tx
            .try_send(PeerAnnouncement {
                peer: self.info.id,
                announcement,
            })
            .is_err()
        {
            tracing::debug!("announcement queue full, dropping announcement");
        }
    }

    /// Runs the connection until it closes.
    pub(crate) async fn run<Str>(mut self, mut stream: Str)
    where
        Str: Stream<Item = Result<Message, WireError>> + Unpin,
    {
        tracing::debug!("connection task started");

        let result = loop {
            tokio::select! {
                biased;
                () = self.connection_guard.should_shutdown() => break Ok(()),
                req = self.client_rx.recv() => {
                    let Some(req) = req else {
                        break Ok(());
                    };
                    if let Err(e) = self.handle_client_request(req).await {
                        break Err(e);
                    }
                }
                message = stream.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => break Err(e.into()),
                        None => break Err(PeerError::ConnectionClosed),
                    };
                    tracing::trace!(message = message.name(), "received message from peer");
                    if let Err(e) = self.handle_peer_message(message).await {
                        break Err(e);
                    }
                }
            }
        };

        match result {
            Ok(()) => tracing::debug!("connection task shutting down"),
            Err(e) => {
                tracing::debug!("connection task stopped with error: {e}");
                if matches!(
                    e,
                    PeerError::PeerSentIncorrectResponse | PeerError::PeerSentInvalidMessage(_)
                ) {
                    self.info.handle.ban_peer();
                }
                drop(self.error.try_insert_err(e));
            }
        }

        for pending in std::mem::take(&mut self.pending).into_values() {
            drop(pending.response_channel.send(Err(PeerError::ConnectionClosed)));
        }

        self.connection_guard.connection_closed();
    }
}
