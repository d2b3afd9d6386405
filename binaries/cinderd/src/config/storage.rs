use serde::{Deserialize, Serialize};

use cinder_chain_indexer::{
    ChainIndexerConfig, BLOOM_SECTION_SIZE, CHT_SECTION_SIZE, DEFAULT_BLOOM_CONFIRMATIONS,
    DEFAULT_CHT_CONFIRMATIONS,
};
use cinder_database::config::FlushMode;

use super::macros::config_struct;

config_struct! {
    /// The storage config.
    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct StorageConfig {
        #[comment_out = true]
        /// When the chain database flushes to disk.
        ///
        /// "Safe" flushes after every write, "Fast" leaves it to the OS.
        /// A crash with "Fast" may lose the latest writes but never
        /// leaves the database half written.
        ///
        /// Valid values | "Safe", "Fast"
        pub flush_mode: FlushMode,

        #[child = true]
        /// The chain indexes kept next to the chain.
        pub indexer: IndexerConfig,
    }
}

config_struct! {
    #[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct IndexerConfig {
        /// Blocks in one bloom section.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub bloom_section_size: u64,

        /// Blocks on top of a bloom section before it is indexed.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub bloom_confirmations: u64,

        /// Blocks in one canonical hash trie section.
        ///
        /// Light nodes prove headers against the trie root
        /// of the section covering them, so this must match
        /// the peers a light node syncs from.
        ///
        /// Type         | Number
        /// Valid values | >= 1
        pub cht_section_size: u64,

        /// Blocks on top of a canonical hash trie section before it is indexed.
        ///
        /// Type         | Number
        /// Valid values | >= 0
        pub cht_confirmations: u64,
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            bloom_section_size: BLOOM_SECTION_SIZE,
            bloom_confirmations: DEFAULT_BLOOM_CONFIRMATIONS,
            cht_section_size: CHT_SECTION_SIZE,
            cht_confirmations: DEFAULT_CHT_CONFIRMATIONS,
        }
    }
}

impl IndexerConfig {
    pub const fn bloom(&self) -> ChainIndexerConfig {
        ChainIndexerConfig {
            section_size: self.bloom_section_size,
            confirmations: self.bloom_confirmations,
        }
    }

    pub const fn cht(&self) -> ChainIndexerConfig {
        ChainIndexerConfig {
            section_size: self.cht_section_size,
            confirmations: self.cht_confirmations,
        }
    }
}
