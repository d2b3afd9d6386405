//! The section driver; `struct ChainIndexer`.

//---------------------------------------------------------------------------------------------------- Import
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::instrument;

use cinder_blockchain::BlockChain;
use cinder_database::{StoreExt, WriteBatch};
use cinder_helper::asynch::rayon_spawn_async;
use cinder_types::{ChainEvent, Hash};

use crate::{
    keys::{section_count_key, section_head_key},
    ChainIndexerConfig, IndexerBackend, IndexerError,
};

//---------------------------------------------------------------------------------------------------- SectionStatus
/// How far an indexer has got.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SectionStatus {
    /// The amount of completed sections.
    pub sections: u64,
    /// The last height covered by a completed section.
    pub indexed_through: Option<u64>,
}

impl SectionStatus {
    const fn new(config: &ChainIndexerConfig, sections: u64) -> Self {
        Self {
            sections,
            indexed_through: match sections.checked_sub(1) {
                Some(last) => Some(config.section_range(last).1),
                None => None,
            },
        }
    }
}

//---------------------------------------------------------------------------------------------------- ChainIndexer
/// Builds an [`IndexerBackend`]'s sections as the canonical chain grows.
///
/// The indexer is cheaply cloneable, all clones drive the same sections.
pub struct ChainIndexer<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ChainIndexer<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B> {
    chain: Arc<BlockChain>,
    config: ChainIndexerConfig,
    /// Held for a whole round, so rounds never overlap.
    backend: Mutex<B>,
    status: watch::Sender<SectionStatus>,
}

impl<B: IndexerBackend> ChainIndexer<B> {
    /// Opens the indexer, dropping stored sections that are no longer canonical.
    ///
    /// Nothing is built until [`ChainIndexer::process`] or [`ChainIndexer::run`].
    ///
    /// # Errors
    /// Fails if the section size is `0` or the stored sections could not be checked.
    pub fn new(
        chain: Arc<BlockChain>,
        backend: B,
        config: ChainIndexerConfig,
    ) -> Result<Self, IndexerError> {
        if config.section_size == 0 {
            return Err(IndexerError::ZeroSectionSize);
        }

        let sections = chain
            .store()
            .get_borsh::<u64>(&section_count_key(B::NAME))?
            .unwrap_or(0);

        let inner = Inner {
            chain,
            config,
            backend: Mutex::new(backend),
            status: watch::channel(SectionStatus::new(&config, sections)).0,
        };

        let backend = inner.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let sections = inner.roll_back(&backend)?;
        drop(backend);

        tracing::debug!(backend = B::NAME, sections, "opened chain indexer");

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> ChainIndexerConfig {
        self.inner.config
    }

    /// The current [`SectionStatus`].
    pub fn status(&self) -> SectionStatus {
        *self.inner.status.borrow()
    }

    /// The amount of completed sections.
    pub fn sections(&self) -> u64 {
        self.status().sections
    }

    /// Subscribe to [`SectionStatus`] changes.
    pub fn subscribe(&self) -> watch::Receiver<SectionStatus> {
        self.inner.status.subscribe()
    }

    /// The canonical hash of the last block in a completed `section`.
    ///
    /// [`None`] once that block is no longer canonical, even before the section is dropped.
    ///
    /// # Errors
    /// Fails if the store could not be read.
    pub fn section_head(&self, section: u64) -> Result<Option<Hash>, IndexerError> {
        if section >= self.sections() {
            return Ok(None);
        }

        let chain = &self.inner.chain;
        let stored = chain
            .store()
            .get_borsh::<Hash>(&section_head_key(B::NAME, section))?;
        let end = self.inner.config.section_range(section).1;

        match stored {
            Some(hash) if chain.canonical_hash(end)? == Some(hash) => Ok(Some(hash)),
            Some(_) | None => Ok(None),
        }
    }

    /// Drops sections the canonical chain no longer contains, then builds every section
    /// the chain has confirmed.
    ///
    /// This blocks on the store, call it from a blocking context.
    ///
    /// Returns the amount of completed sections.
    ///
    /// # Errors
    /// Fails if the chain or the store could not be read or written. Sections completed
    /// before the error stay completed.
    pub fn process(&self) -> Result<u64, IndexerError> {
        self.inner.process()
    }

    /// Keeps the indexer up to date with the chain.
    ///
    /// Returns when the chain is dropped.
    #[instrument(level = "info", name = "indexer", skip_all, fields(backend = B::NAME))]
    pub async fn run(self) {
        let mut events = self.inner.chain.subscribe();

        loop {
            let inner = Arc::clone(&self.inner);
            if let Err(e) = rayon_spawn_async(move || inner.process()).await {
                tracing::warn!("failed to index sections: {e}");
            }

            loop {
                match events.recv().await {
                    Ok(ChainEvent::ChainHead { .. }) | Err(RecvError::Lagged(_)) => break,
                    Ok(ChainEvent::ChainSide { .. } | ChainEvent::Logs { .. }) => (),
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }
}

impl<B: IndexerBackend> Inner<B> {
    fn set_sections(&self, sections: u64) {
        self.status
            .send_replace(SectionStatus::new(&self.config, sections));
    }

    /// Drops completed sections from the top down until the last one is canonical.
    ///
    /// Returns the amount of sections left.
    fn roll_back(&self, backend: &B) -> Result<u64, IndexerError> {
        let store = self.chain.store();
        let head = self.chain.head_header()?.number;

        let mut sections = self.status.borrow().sections;
        while let Some(section) = sections.checked_sub(1) {
            let end = self.config.section_range(section).1;

            let stored = store.get_borsh::<Hash>(&section_head_key(B::NAME, section))?;
            if end <= head && stored.is_some() && self.chain.canonical_hash(end)? == stored {
                break;
            }

            tracing::info!(backend = B::NAME, section, "dropping reorganised section");

            let mut batch = WriteBatch::new();
            batch.delete(section_head_key(B::NAME, section));
            backend.prune(section, &mut batch);
            batch.put_borsh(section_count_key(B::NAME), &section);
            store.write_batch(batch)?;

            sections = section;
            self.set_sections(sections);
        }

        Ok(sections)
    }

    fn process(&self) -> Result<u64, IndexerError> {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);

        let mut sections = self.roll_back(&backend)?;
        let target = self
            .config
            .processable_sections(self.chain.head_header()?.number);

        while sections < target {
            if !self.build_section(&mut backend, sections)? {
                tracing::debug!(
                    backend = B::NAME,
                    section = sections,
                    "chain moved while indexing, retrying later"
                );
                break;
            }
            sections += 1;
            self.set_sections(sections);
        }

        Ok(sections)
    }

    /// Builds and stores `section`.
    ///
    /// Returns `false` if the canonical chain changed under the section, nothing is
    /// stored then.
    fn build_section(&self, backend: &mut B, section: u64) -> Result<bool, IndexerError> {
        let store = self.chain.store();
        let (start, end) = self.config.section_range(section);

        backend.reset(&self.chain, section)?;

        let mut parent = match section.checked_sub(1) {
            Some(previous) => store.get_borsh::<Hash>(&section_head_key(B::NAME, previous))?,
            None => None,
        };

        for number in start..=end {
            let Some(header) = self.chain.header_by_number(number)? else {
                return Ok(false);
            };
            if parent.is_some_and(|parent| parent != header.parent_hash) {
                return Ok(false);
            }

            let hash = header.hash();
            let weight = self
                .chain
                .weight(&hash)?
                .ok_or(IndexerError::MissingHeader { number })?;

            backend.process(&self.chain, &header, weight)?;
            parent = Some(hash);
        }

        let Some(head) = parent else {
            return Ok(false);
        };

        let mut batch = WriteBatch::new();
        backend.commit(section, &mut batch)?;
        batch.put_borsh(section_head_key(B::NAME, section), &head);
        batch.put_borsh(section_count_key(B::NAME), &(section + 1));
        store.write_batch(batch)?;

        tracing::debug!(backend = B::NAME, section, "indexed section");

        Ok(true)
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use cinder_test_utils::chain::{test_genesis, ChainBuilder};
    use cinder_types::SyncMode;

    use super::*;
    use crate::{section_bloom, BloomIndexer};

    fn config() -> ChainIndexerConfig {
        ChainIndexerConfig {
            section_size: 8,
            confirmations: 2,
        }
    }

    #[tokio::test]
    async fn sections_are_built_once_confirmed() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(20);
        let chain = builder.open_chain(SyncMode::Light);
        builder.import_into(&chain, 16).await;

        let indexer = ChainIndexer::new(Arc::clone(&chain), BloomIndexer::new(), config()).unwrap();
        assert_eq!(indexer.status(), SectionStatus::default());

        // Heights 0..=16, 16 and 17 would have to exist for 2 sections.
        assert_eq!(indexer.process().unwrap(), 1);
        assert_eq!(
            indexer.status(),
            SectionStatus {
                sections: 1,
                indexed_through: Some(7),
            }
        );
        assert_eq!(
            indexer.section_head(0).unwrap(),
            Some(builder.header(7).unwrap().hash())
        );
        assert_eq!(indexer.section_head(1).unwrap(), None);

        builder.import_into(&chain, 17).await;
        assert_eq!(indexer.process().unwrap(), 2);

        let mut expected = cinder_types::Bloom::default();
        for number in 8..=15 {
            expected.union(&builder.header(number).unwrap().bloom);
        }
        assert_eq!(section_bloom(&chain, 1).unwrap(), Some(expected));
    }

    #[test]
    fn zero_section_size_is_rejected() {
        let chain = cinder_test_utils::chain::open_chain(&test_genesis(), SyncMode::Light);
        let config = ChainIndexerConfig {
            section_size: 0,
            confirmations: 0,
        };

        assert!(matches!(
            ChainIndexer::new(chain, BloomIndexer::new(), config),
            Err(IndexerError::ZeroSectionSize)
        ));
    }

    #[tokio::test]
    async fn status_changes_are_published() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(9);
        let chain = builder.build().await;

        let indexer = ChainIndexer::new(chain, BloomIndexer::new(), config()).unwrap();
        let mut status = indexer.subscribe();
        assert!(!status.has_changed().unwrap());

        indexer.process().unwrap();

        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().sections, 1);
    }
}
