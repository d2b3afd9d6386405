use cinder_blockchain::ChainError;
use cinder_database::DbError;
use cinder_types::trie::TrieError;

/// An error building an index section.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    /// The canonical chain has no header (or no weight) at a height below its head.
    #[error("canonical header {number} is missing")]
    MissingHeader { number: u64 },
    /// A section is built on an earlier one that is not indexed.
    #[error("section {section} is not indexed")]
    MissingSection { section: u64 },
    /// A backend was asked to commit a section it was given no headers for.
    #[error("section {section} has no headers")]
    EmptySection { section: u64 },
    #[error("the section size can not be 0")]
    ZeroSectionSize,
}
