//! Cinder consensus.
//!
//! Header validation is split in two:
//!
//! - The generic rules every engine shares, see [`check_header_link`].
//! - The seal, which is defined by the [`ConsensusEngine`] the node was built with.
//!
//! Both are reachable through the [`ConsensusValidator`] capability, which is what the
//! rest of the node consumes.

mod batch;
mod engine;
mod rules;

pub use batch::validate_header_chain;
pub use engine::{seal_authority, seal_work, ConsensusEngine};
pub use rules::{check_header_link, ALLOWED_FUTURE_SECS, MAX_EXTRA_LEN};

use cinder_types::{Address, Header};

/// An error validating a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("the header does not link to its parent")]
    ParentMismatch,
    #[error("the header's height is incorrect, expected {expected} got {got}")]
    NumberMismatch { expected: u64, got: u64 },
    #[error("the header's timestamp is not after its parent's")]
    TimestampNotIncreasing,
    #[error("the header's timestamp is too far in the future")]
    TimestampInFuture,
    #[error("the header's extra data is too long")]
    ExtraTooLong,
    #[error("the header's difficulty is invalid")]
    InvalidDifficulty,
    #[error("the header's seal is invalid")]
    InvalidSeal,
    #[error("the header was sealed by an unauthorized signer")]
    UnauthorizedSigner,
}

/// The consensus capability the chain and the sync pipeline validate headers with.
pub trait ConsensusValidator: Send + Sync + 'static {
    /// Checks `header` against its `parent`, including the seal.
    fn validate_header(&self, header: &Header, parent: &Header) -> Result<(), ConsensusError>;

    /// Checks only the seal of `header`.
    fn validate_seal(&self, header: &Header) -> Result<(), ConsensusError>;

    /// Returns the account that produced `header`.
    fn author(&self, header: &Header) -> Result<Address, ConsensusError>;
}
