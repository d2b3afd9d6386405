use std::sync::{Arc, OnceLock};

use tokio::time::error::Elapsed;

use cinder_wire::{RequestKind, WireError};

/// An error that can be set once and read by every clone.
pub struct SharedError<T>(Arc<OnceLock<T>>);

impl<T> Clone for SharedError<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for SharedError<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedError<T> {
    pub fn new() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    pub fn try_get_err(&self) -> Option<&T> {
        self.0.get()
    }

    /// Sets the error, if one was already set it is returned and `err` is dropped.
    pub fn try_insert_err(&self, err: T) -> Result<(), &T> {
        self.0
            .set(err)
            .map_err(|_| self.0.get().expect("the error was just set"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("the connection was closed")]
    ConnectionClosed,
    #[error("the connection task's client channel was closed")]
    ClientChannelClosed,
    #[error("the peer sent an incorrect response to our request")]
    PeerSentIncorrectResponse,
    #[error("the peer sent an invalid message: {0}")]
    PeerSentInvalidMessage(&'static str),
    #[error("the negotiated protocol version does not support {0} requests")]
    UnsupportedRequest(RequestKind),
    #[error("inner service error: {0}")]
    ServiceError(#[from] tower::BoxError),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("the handshake timed out")]
    TimedOut(#[from] Elapsed),
    #[error("peer is on a different network")]
    IncorrectNetwork,
    #[error("peer has a different genesis block")]
    IncorrectGenesis,
    #[error("peer sent invalid message: {0}")]
    PeerSentInvalidMessage(&'static str),
    #[error("the connection closed during the handshake")]
    ConnectionClosed,
    #[error("internal service error: {0}")]
    InternalSvcErr(#[from] tower::BoxError),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
