use std::{
    fmt::{Display, Formatter},
    net::SocketAddr,
};

use cinder_wire::{BlockAnnouncement, NewBlock};

/// The opaque identity of a connected peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    /// A fresh random id.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// The id of the peer at `addr`, stable across reconnects.
    pub fn from_addr(addr: &SocketAddr) -> Self {
        let hash = blake3::hash(addr.to_string().as_bytes());
        let mut id = [0; 8];
        id.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_le_bytes(id))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The direction of a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionDirection {
    /// An inbound connection to our node.
    Inbound,
    /// An outbound connection from our node.
    Outbound,
}

/// A request for our current head.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoreSyncDataRequest;

/// A block announcement received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAnnouncement {
    pub peer: PeerId,
    pub announcement: Announcement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// `NewBlockHashes`.
    Hashes(Vec<BlockAnnouncement>),
    /// `NewBlock`.
    Block(Box<NewBlock>),
}
