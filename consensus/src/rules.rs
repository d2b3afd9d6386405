//! Rules shared by every engine.
use cinder_helper::time::current_unix_timestamp;
use cinder_types::Header;

use crate::ConsensusError;

/// The maximum length of [`Header::extra`].
pub const MAX_EXTRA_LEN: usize = 32;

/// How far ahead of our clock a header's timestamp may be.
pub const ALLOWED_FUTURE_SECS: u64 = 15;

/// Checks the engine independent rules of `header` against `parent`.
pub fn check_header_link(header: &Header, parent: &Header) -> Result<(), ConsensusError> {
    if header.parent_hash != parent.hash() {
        return Err(ConsensusError::ParentMismatch);
    }

    let expected = parent.number + 1;
    if header.number != expected {
        return Err(ConsensusError::NumberMismatch {
            expected,
            got: header.number,
        });
    }

    if header.timestamp <= parent.timestamp {
        return Err(ConsensusError::TimestampNotIncreasing);
    }

    if header.timestamp > current_unix_timestamp() + ALLOWED_FUTURE_SECS {
        return Err(ConsensusError::TimestampInFuture);
    }

    if header.extra.len() > MAX_EXTRA_LEN {
        return Err(ConsensusError::ExtraTooLong);
    }

    if header.difficulty == 0 {
        return Err(ConsensusError::InvalidDifficulty);
    }

    Ok(())
}
