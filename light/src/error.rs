use cinder_blockchain::ChainError;
use cinder_p2p::RetrieveError;
use cinder_types::{trie::TrieError, Hash};

/// An error retrieving data on demand.
#[derive(Debug, thiserror::Error)]
pub enum OdrError {
    #[error("retrieval failed: {0}")]
    Retrieve(#[from] RetrieveError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    /// The header of the block is not stored, so nothing about it can be verified.
    #[error("unknown block {}", hex::encode(&.0[..8]))]
    UnknownBlock(Hash),
    /// The height is above our head, or below it with no CHT section covering it.
    #[error("no trusted CHT root covers height {number}")]
    NotIndexed { number: u64 },
}

impl OdrError {
    /// Returns `true` if the caller gave up on the request.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Retrieve(RetrieveError::Cancelled))
    }
}
