use cinder_consensus::ConsensusError;
use cinder_database::DbError;
use cinder_types::{trie::TrieError, Hash};

use crate::executor::ExecutionError;

/// An error reading from or writing to the local chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("header {number} is invalid: {error}")]
    Consensus {
        number: u64,
        #[source]
        error: ConsensusError,
    },
    #[error("unknown parent {}", hex::encode(&.0[..8]))]
    UnknownParent(Hash),
    #[error("unknown block {}", hex::encode(&.0[..8]))]
    UnknownBlock(Hash),
    #[error("no canonical block at height {0}")]
    UnknownNumber(u64),
    #[error("headers are not a contiguous chain")]
    NotContiguous,
    #[error("body of block {number} does not match its header")]
    BodyMismatch { number: u64 },
    #[error("receipts of block {number} do not match its header")]
    ReceiptsMismatch { number: u64 },
    #[error("state root after executing block {number} does not match its header")]
    StateRootMismatch { number: u64 },
    #[error("the state needed to execute block {number} is missing")]
    MissingState { number: u64 },
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("state trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("stored genesis does not match the configured genesis")]
    GenesisMismatch,
}

