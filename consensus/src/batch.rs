use rayon::prelude::*;

use cinder_types::Header;

use crate::{check_header_link, ConsensusError, ConsensusValidator};

/// Validates a batch of headers that should extend `parent`.
///
/// The links between headers are checked in order, the seals are checked in parallel.
/// On failure the index of the first invalid header is returned with the error.
///
/// This is CPU heavy and should be run on the rayon pool.
pub fn validate_header_chain<V: ConsensusValidator + ?Sized>(
    validator: &V,
    parent: &Header,
    headers: &[Header],
) -> Result<(), (usize, ConsensusError)> {
    let mut prev = parent;
    for (i, header) in headers.iter().enumerate() {
        check_header_link(header, prev).map_err(|e| (i, e))?;
        prev = header;
    }

    let first_bad_seal = headers
        .par_iter()
        .enumerate()
        .filter_map(|(i, header)| validator.validate_seal(header).err().map(|e| (i, e)))
        .min_by_key(|(i, _)| *i);

    match first_bad_seal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
