//! Indexer configuration.

/// The amount of blocks in a bloom section.
pub const BLOOM_SECTION_SIZE: u64 = 4096;

/// The amount of blocks in a CHT section.
pub const CHT_SECTION_SIZE: u64 = 32_768;

/// The amount of blocks on top of a bloom section before it is indexed.
pub const DEFAULT_BLOOM_CONFIRMATIONS: u64 = 256;

/// The amount of blocks on top of a CHT section before it is indexed.
pub const DEFAULT_CHT_CONFIRMATIONS: u64 = 256;

/// The [`ChainIndexer`](crate::ChainIndexer) config.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChainIndexerConfig {
    /// The amount of blocks in a section, must not be `0`.
    pub section_size: u64,
    /// A section is indexed once the chain is this many blocks past its last block.
    pub confirmations: u64,
}

impl ChainIndexerConfig {
    /// The config for a [`BloomIndexer`](crate::BloomIndexer).
    pub const fn bloom() -> Self {
        Self {
            section_size: BLOOM_SECTION_SIZE,
            confirmations: DEFAULT_BLOOM_CONFIRMATIONS,
        }
    }

    /// The config for a [`ChtIndexer`](crate::ChtIndexer).
    pub const fn cht() -> Self {
        Self {
            section_size: CHT_SECTION_SIZE,
            confirmations: DEFAULT_CHT_CONFIRMATIONS,
        }
    }

    /// The first and last height of `section`.
    pub const fn section_range(&self, section: u64) -> (u64, u64) {
        let start = section * self.section_size;
        (start, start + self.section_size - 1)
    }

    /// The amount of sections that can be indexed with the chain at `head`.
    pub const fn processable_sections(&self, head: u64) -> u64 {
        match (head + 1).checked_sub(self.confirmations) {
            Some(confirmed) => confirmed / self.section_size,
            None => 0,
        }
    }
}

impl Default for ChainIndexerConfig {
    fn default() -> Self {
        Self::bloom()
    }
}
