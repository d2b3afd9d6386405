//! # Cinder Chain Indexer
//!
//! The [`ChainIndexer`] splits the canonical chain into fixed size sections and builds
//! an index over each one once the chain has grown past it, see [`ChainIndexerConfig`].
//!
//! What is built is up to the [`IndexerBackend`]:
//!
//! | Backend         | Section data |
//! |-----------------|--------------|
//! | [`BloomIndexer`]| the union of every header's bloom, to skip sections when filtering logs
//! | [`ChtIndexer`]  | the root of the canonical hash trie over every height so far, light clients check headers against it
//!
//! A completed section is never changed. If the canonical chain is reorganised below the
//! end of a completed section, that section and every later one are dropped and built
//! again once the chain has grown past them on the new branch.
//!
//! Section metadata is kept in the chain's [`KeyValueStore`](cinder_database::KeyValueStore)
//! and checked against the canonical chain when the indexer is opened again.

mod backend;
mod bloom;
mod cht;
mod config;
mod error;
mod indexer;
mod keys;

pub use backend::IndexerBackend;
pub use bloom::{section_bloom, sections_matching, BloomIndexer};
pub use cht::{ChtEntry, ChtIndexer};
pub use config::{
    ChainIndexerConfig, BLOOM_SECTION_SIZE, CHT_SECTION_SIZE, DEFAULT_BLOOM_CONFIRMATIONS,
    DEFAULT_CHT_CONFIRMATIONS,
};
pub use error::IndexerError;
pub use indexer::{ChainIndexer, SectionStatus};
