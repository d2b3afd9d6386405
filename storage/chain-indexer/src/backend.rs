use cinder_blockchain::BlockChain;
use cinder_database::WriteBatch;
use cinder_types::Header;

use crate::IndexerError;

/// Builds the data of one kind of index, one section at a time.
///
/// The [`ChainIndexer`](crate::ChainIndexer) drives a backend through a section:
/// [`reset`](Self::reset), [`process`](Self::process) for every header of the section
/// in height order, then [`commit`](Self::commit). A section may be abandoned after any
/// call, the next one always starts with a [`reset`](Self::reset).
pub trait IndexerBackend: Send + 'static {
    /// The name the indexer's records are stored under, unique per backend.
    const NAME: &'static str;

    /// Starts building `section`.
    ///
    /// # Errors
    /// Fails if data from an earlier section could not be read.
    fn reset(&mut self, chain: &BlockChain, section: u64) -> Result<(), IndexerError>;

    /// Adds the next header of the section, `weight` is the chain's weight up to it.
    ///
    /// # Errors
    /// Fails if the index could not be updated.
    fn process(
        &mut self,
        chain: &BlockChain,
        header: &Header,
        weight: u128,
    ) -> Result<(), IndexerError>;

    /// Adds the finished section's data to `batch`.
    ///
    /// # Errors
    /// Fails if the section's data could not be finished.
    fn commit(&mut self, section: u64, batch: &mut WriteBatch) -> Result<(), IndexerError>;

    /// Adds the deletion of `section`'s data to `batch`.
    fn prune(&self, section: u64, batch: &mut WriteBatch);
}
