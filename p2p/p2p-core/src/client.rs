//! The peer [`Client`], the handle other tasks use to talk to a connected peer.

use std::{
    fmt::{Debug, Formatter},
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{mpsc, oneshot};

use cinder_types::HeadInfo;
use cinder_wire::{Message, PeerCapabilities, ProtocolRequest, ProtocolResponse, ProtocolVersion};

use crate::{
    handles::ConnectionHandle, ConnectionDirection, PeerError, PeerId, SharedError,
};

mod connection;
mod handshaker;
mod request_handler;

pub(crate) use connection::ConnectionTaskRequest;
pub use handshaker::{DoHandshakeRequest, Handshaker, OurNodeInfo};
pub use request_handler::DummyRequestHandler;

/// Information on a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInformation {
    pub id: PeerId,
    pub direction: ConnectionDirection,
    /// The protocol version both sides speak.
    pub version: ProtocolVersion,
    pub capabilities: PeerCapabilities,
    pub handle: ConnectionHandle,
    /// The heaviest head the peer told us about, updated by its announcements.
    pub head: Arc<Mutex<HeadInfo>>,
}

impl PeerInformation {
    pub fn head(&self) -> HeadInfo {
        *self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the peer's head if `head` is heavier, returns `true` if it was.
    pub fn update_head(&self, head: HeadInfo) -> bool {
        let mut current = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        if head.weight > current.weight {
            *current = head;
            true
        } else {
            false
        }
    }
}

/// A handle to a connected peer.
///
/// Cloning a [`Client`] is cheap, every clone talks to the same connection task.
#[derive(Clone)]
pub struct Client {
    pub info: PeerInformation,
    connection_tx: mpsc::Sender<ConnectionTaskRequest>,
    error: SharedError<PeerError>,
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) const fn new(
        info: PeerInformation,
        connection_tx: mpsc::Sender<ConnectionTaskRequest>,
        error: SharedError<PeerError>,
    ) -> Self {
        Self {
            info,
            connection_tx,
            error,
        }
    }

    pub const fn id(&self) -> PeerId {
        self.info.id
    }

    pub fn head(&self) -> HeadInfo {
        self.info.head()
    }

    pub fn is_closed(&self) -> bool {
        self.info.handle.is_closed()
    }

    /// The reason the connection task stopped, if it stopped with an error.
    pub fn close_reason(&self) -> Option<&PeerError> {
        self.error.try_get_err()
    }

    /// Sends `request` to the peer and waits for the matching response.
    ///
    /// There is no timeout here, callers race this against their own timer.
    ///
    /// # Errors
    /// - [`PeerError::UnsupportedRequest`] if the negotiated version is too old.
    /// - [`PeerError::ConnectionClosed`] if the connection closes before the response arrives.
    /// - [`PeerError::PeerSentIncorrectResponse`] if the response does not answer the request.
    pub async fn request(&self, request: ProtocolRequest) -> Result<ProtocolResponse, PeerError> {
        let kind = request.kind();
        if kind.min_version() > self.info.version {
            return Err(PeerError::UnsupportedRequest(kind));
        }

        let (tx, rx) = oneshot::channel();
        self.connection_tx
            .send(ConnectionTaskRequest::Request {
                request,
                response_channel: tx,
            })
            .await
            .map_err(|_| PeerError::ClientChannelClosed)?;

        rx.await.unwrap_or(Err(PeerError::ConnectionClosed))
    }

    /// Queues an announcement for the peer, dropping it if the connection is busy.
    pub fn announce(&self, message: Message) {
        if self
            .connection_tx
            .try_send(ConnectionTaskRequest::Announce(message))
            .is_err()
        {
            tracing::trace!(peer = %self.info.id, "dropped announcement to busy peer");
        }
    }

    /// Closes the connection.
    pub fn disconnect(&self) {
        self.info.handle.send_close_signal();
    }
}
