//! # Cinder P2P Core
//!
//! The low level half of Cinder's networking: turning a byte stream into a handshaken
//! peer [`Client`](client::Client) that many tasks can send requests through at once.
//!
//! # Connections
//!
//! Every connection is driven by one connection task, spawned by the
//! [`Handshaker`](client::Handshaker) once the [`Status`](cinder_wire::Status) exchange
//! succeeds. The task:
//!
//! - gives each outgoing request a correlation id and routes the response carrying
//!   the same id back to the waiting caller,
//! - answers the peer's requests with a [`ProtocolRequestHandler`],
//! - tracks the peer's advertised head from its announcements and forwards the
//!   announcements as [`PeerAnnouncement`]s.
//!
//! The task stops when the [`ConnectionHandle`](handles::ConnectionHandle) is closed,
//! the peer misbehaves, or every [`Client`](client::Client) is dropped.
//!
//! # Transports
//!
//! [`transports`] frames any [`AsyncRead`](tokio::io::AsyncRead) + [`AsyncWrite`](tokio::io::AsyncWrite)
//! with the [`MessageCodec`](cinder_wire::MessageCodec), TCP and in-memory pipes are provided.

pub mod client;
mod constants;
pub mod error;
pub mod handles;
pub mod transports;
mod types;

pub use constants::{CLIENT_QUEUE_SIZE, HANDSHAKE_TIMEOUT};
pub use error::{HandshakeError, PeerError, SharedError};
pub use types::{Announcement, ConnectionDirection, CoreSyncDataRequest, PeerAnnouncement, PeerId};

use cinder_types::HeadInfo;
use cinder_wire::{ProtocolRequest, ProtocolResponse};

// ####################################################################################
// Below here is just helper traits, so we don't have to type out tower::Service bounds
// everywhere but still get to use tower.

/// Answers the [`ProtocolRequest`]s peers send us.
pub trait ProtocolRequestHandler:
    tower::Service<
        ProtocolRequest,
        Response = ProtocolResponse,
        Error = tower::BoxError,
        Future: Send + 'static,
    > + Clone
    + Send
    + 'static
{
}

impl<T> ProtocolRequestHandler for T where
    T: tower::Service<
            ProtocolRequest,
            Response = ProtocolResponse,
            Error = tower::BoxError,
            Future: Send + 'static,
        > + Clone
        + Send
        + 'static
{
}

/// Returns our current head, sent to peers in the handshake.
pub trait CoreSyncSvc:
    tower::Service<
        CoreSyncDataRequest,
        Response = HeadInfo,
        Error = tower::BoxError,
        Future: Send + 'static,
    > + Clone
    + Send
    + 'static
{
}

impl<T> CoreSyncSvc for T where
    T: tower::Service<
            CoreSyncDataRequest,
            Response = HeadInfo,
            Error = tower::BoxError,
            Future: Send + 'static,
        > + Clone
        + Send
        + 'static
{
}
