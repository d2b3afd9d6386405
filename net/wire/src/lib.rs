//! # Cinder Wire
//!
//! The messages peers exchange and the codec framing them on a stream.
//!
//! Every message is a [`borsh`] encoded [`Message`] behind a 4 byte big endian length prefix.
//!
//! Requests carry a correlation id which the response echoes back, this lets a peer
//! have many requests in flight on one connection and lets the requester match replies
//! to the request that caused them.

mod capabilities;
mod codec;
mod message;
mod protocol;

pub use capabilities::{PeerCapabilities, ProtocolVersion};
pub use codec::{MessageCodec, MAX_MESSAGE_SIZE};
pub use message::{BlockAnnouncement, Message, NewBlock, PeerRequest, PeerResponse, Status};
pub use protocol::{
    HelperTrieProof, HelperTrieRequest, ProofRequest, ProtocolRequest, ProtocolResponse,
    RequestKind,
};

/// An error encoding or decoding a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message could not be decoded")]
    Decode,
    #[error("message exceeded the maximum size")]
    TooLarge,
}
