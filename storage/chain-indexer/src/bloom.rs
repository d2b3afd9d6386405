//! The bloom section backend.
use borsh::{BorshDeserialize, BorshSerialize};

use cinder_blockchain::BlockChain;
use cinder_database::{StoreExt, WriteBatch};
use cinder_types::{Bloom, Hash, Header};

use crate::{keys::bloom_section_key, IndexerBackend, IndexerError};

/// The record stored for a completed section.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct BloomSection {
    union: Bloom,
    /// The height and hash of the section's last block.
    head: (u64, Hash),
}

/// Builds the union of every header bloom in a section.
#[derive(Debug, Default)]
pub struct BloomIndexer {
    union: Bloom,
    head: Option<(u64, Hash)>,
}

impl BloomIndexer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexerBackend for BloomIndexer {
    const NAME: &'static str = "bloom";

    fn reset(&mut self, _: &BlockChain, _: u64) -> Result<(), IndexerError> {
        self.union = Bloom::default();
        self.head = None;
        Ok(())
    }

    fn process(&mut self, _: &BlockChain, header: &Header, _: u128) -> Result<(), IndexerError> {
        self.union.union(&header.bloom);
        self.head = Some((header.number, header.hash()));
        Ok(())
    }

    fn commit(&mut self, section: u64, batch: &mut WriteBatch) -> Result<(), IndexerError> {
        let head = self.head.ok_or(IndexerError::EmptySection { section })?;
        let record = BloomSection {
            union: std::mem::take(&mut self.union),
            head,
        };
        batch.put_borsh(bloom_section_key(section), &record);
        Ok(())
    }

    fn prune(&self, section: u64, batch: &mut WriteBatch) {
        batch.delete(bloom_section_key(section));
    }
}

/// The union bloom of a completed section.
///
/// [`None`] once the section's last block is no longer canonical, even if the indexer
/// has not dropped the section yet.
///
/// # Errors
/// Fails if the chain could not be read.
pub fn section_bloom(chain: &BlockChain, section: u64) -> Result<Option<Bloom>, IndexerError> {
    let Some(record) = chain
        .store()
        .get_borsh::<BloomSection>(&bloom_section_key(section))?
    else {
        return Ok(None);
    };

    let (number, hash) = record.head;
    if chain.canonical_hash(number)? != Some(hash) {
        return Ok(None);
    }
    Ok(Some(record.union))
}

/// The completed canonical sections, below `sections`, that may hold logs matching `input`.
///
/// # Errors
/// Fails if the chain could not be read.
pub fn sections_matching(
    chain: &BlockChain,
    sections: u64,
    input: &[u8],
) -> Result<Vec<u64>, IndexerError> {
    let mut matching = Vec::new();
    for section in 0..sections {
        if section_bloom(chain, section)?.is_some_and(|bloom| bloom.contains_input(input)) {
            matching.push(section);
        }
    }
    Ok(matching)
}
