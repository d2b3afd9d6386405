//! Sections built over a real chain: reorganisations, restarts and CHT proofs.
use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use cinder_blockchain::{serve_request, tables::cht_entry_key, BlockChain};
use cinder_chain_indexer::{
    section_bloom, sections_matching, BloomIndexer, ChainIndexer, ChainIndexerConfig, ChtEntry,
    ChtIndexer, SectionStatus,
};
use cinder_test_utils::chain::{test_genesis, ChainBuilder};
use cinder_types::{trie, Bloom, Hash, SyncMode};
use cinder_wire::{HelperTrieRequest, ProtocolRequest, ProtocolResponse};

const SECTION_SIZE: u64 = 10;

fn config() -> ChainIndexerConfig {
    ChainIndexerConfig {
        section_size: SECTION_SIZE,
        confirmations: 0,
    }
}

/// The stored data of the first `sections` sections of both indexes.
fn digest(chain: &BlockChain, sections: u64) -> Vec<(Option<Bloom>, Option<Hash>)> {
    (0..sections)
        .map(|section| {
            (
                section_bloom(chain, section).unwrap(),
                chain.cht_root(section).unwrap(),
            )
        })
        .collect()
}

struct Indexers {
    bloom: ChainIndexer<BloomIndexer>,
    cht: ChainIndexer<ChtIndexer>,
}

impl Indexers {
    fn open(chain: &Arc<BlockChain>) -> Self {
        Self {
            bloom: ChainIndexer::new(Arc::clone(chain), BloomIndexer::new(), config()).unwrap(),
            cht: ChainIndexer::new(Arc::clone(chain), ChtIndexer::new(), config()).unwrap(),
        }
    }

    fn process(&self) -> u64 {
        let sections = self.bloom.process().unwrap();
        assert_eq!(self.cht.process().unwrap(), sections);
        sections
    }
}

#[tokio::test]
async fn reorganised_sections_are_rebuilt_on_the_new_branch() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(50);
    let mut fork = builder.fork(35, 1);
    fork.extend(15);

    let chain = builder.open_chain(SyncMode::Light);
    builder.import_into(&chain, 50).await;

    let indexers = Indexers::open(&chain);
    assert_eq!(indexers.process(), 5);
    let section_3 = indexers.cht.section_head(3).unwrap();
    assert_eq!(section_3, Some(builder.header(39).unwrap().hash()));

    // The head drops to 40, section 4 (40..=49) is gone.
    chain.writer().await.set_head(40).unwrap();
    assert_eq!(indexers.process(), 4);
    assert_eq!(indexers.bloom.section_head(4).unwrap(), None);
    assert_eq!(chain.cht_root(4).unwrap(), None);
    assert_eq!(indexers.cht.section_head(3).unwrap(), section_3);

    // 50 is reached again through a branch from 35, section 3 changes too.
    chain
        .writer()
        .await
        .insert_headers(fork.headers(36, 50))
        .await
        .unwrap();
    assert_eq!(chain.head_header().unwrap(), fork.head());

    assert_eq!(indexers.process(), 5);
    assert_eq!(
        indexers.cht.section_head(3).unwrap(),
        Some(fork.header(39).unwrap().hash())
    );
    assert_eq!(
        indexers.bloom.status(),
        SectionStatus {
            sections: 5,
            indexed_through: Some(49),
        }
    );

    let fresh = fork.open_chain(SyncMode::Light);
    fork.import_into(&fresh, 50).await;
    assert_eq!(Indexers::open(&fresh).process(), 5);

    assert_eq!(digest(&chain, 5), digest(&fresh, 5));
}

#[tokio::test]
async fn reorganised_sections_are_not_served_before_the_indexer_runs() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(50);
    let mut fork = builder.fork(35, 1);
    fork.extend(15);

    let chain = builder.open_chain(SyncMode::Light);
    builder.import_into(&chain, 50).await;

    let indexers = Indexers::open(&chain);
    assert_eq!(indexers.process(), 5);
    let helper_proofs = |section, number| {
        let response = serve_request(
            &chain,
            &ProtocolRequest::GetHelperTrieProofs(vec![HelperTrieRequest { section, number }]),
        )
        .unwrap();
        let ProtocolResponse::HelperTrieProofs(proofs) = response else {
            panic!("wrong response kind: {response:?}");
        };
        proofs
    };
    assert_eq!(helper_proofs(3, 37).len(), 1);

    // Nothing is processed from here on, the stored sections are stale.
    chain.writer().await.set_head(40).unwrap();
    assert_eq!(chain.cht_root(4).unwrap(), None);
    assert_eq!(section_bloom(&chain, 4).unwrap(), None);
    assert_eq!(indexers.bloom.section_head(4).unwrap(), None);
    assert_eq!(indexers.cht.section_head(4).unwrap(), None);
    assert!(helper_proofs(4, 42).is_empty());

    // Section 3 still ends on the canonical chain.
    assert!(chain.cht_root(3).unwrap().is_some());
    assert!(section_bloom(&chain, 3).unwrap().is_some());

    chain
        .writer()
        .await
        .insert_headers(fork.headers(36, 50))
        .await
        .unwrap();
    assert_eq!(chain.head_header().unwrap(), fork.head());

    for section in 3..5 {
        assert_eq!(chain.cht_root(section).unwrap(), None);
        assert_eq!(section_bloom(&chain, section).unwrap(), None);
        assert_eq!(indexers.cht.section_head(section).unwrap(), None);
    }
    assert!(helper_proofs(3, 37).is_empty());
    let input = builder.header(45).unwrap().hash();
    assert!(sections_matching(&chain, 5, &input)
        .unwrap()
        .iter()
        .all(|section| *section < 3));

    // Sections below the fork are untouched.
    assert!(chain.cht_root(2).unwrap().is_some());
    assert_eq!(
        indexers.cht.section_head(2).unwrap(),
        Some(builder.header(29).unwrap().hash())
    );
}

#[tokio::test]
async fn reopened_indexer_drops_sections_reorganised_while_closed() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(30);
    let mut fork = builder.fork(15, 7);
    fork.extend(20);

    let chain = builder.open_chain(SyncMode::Light);
    builder.import_into(&chain, 30).await;

    assert_eq!(Indexers::open(&chain).process(), 3);

    chain
        .writer()
        .await
        .insert_headers(fork.headers(16, 35))
        .await
        .unwrap();

    // Section 0 is still canonical, 1 and 2 are not.
    let reopened = Indexers::open(&chain);
    assert_eq!(reopened.bloom.sections(), 1);
    assert_eq!(reopened.cht.sections(), 1);
    assert_eq!(chain.cht_root(1).unwrap(), None);

    assert_eq!(reopened.process(), 3);
    assert_eq!(
        reopened.cht.section_head(2).unwrap(),
        Some(fork.header(29).unwrap().hash())
    );
}

#[tokio::test]
async fn cht_proofs_check_out_against_the_section_root() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(29);
    let chain = builder.build().await;

    let indexer = ChainIndexer::new(Arc::clone(&chain), ChtIndexer::new(), config()).unwrap();
    assert_eq!(indexer.process().unwrap(), 3);

    // Section 2's trie covers every height up to 29.
    let root = chain.cht_root(2).unwrap().unwrap();

    for number in [0, 9, 13, 29] {
        let response = serve_request(
            &chain,
            &ProtocolRequest::GetHelperTrieProofs(vec![HelperTrieRequest {
                section: 2,
                number,
            }]),
        )
        .unwrap();
        let ProtocolResponse::HelperTrieProofs(proofs) = response else {
            panic!("wrong response kind: {response:?}");
        };

        let value = trie::verify_proof(root, &cht_entry_key(number), &proofs[0].proof)
            .unwrap()
            .unwrap();
        let entry = ChtEntry::decode(&value).unwrap();

        let header = builder.header(number).unwrap().clone();
        assert_eq!(entry.hash, header.hash());
        assert_eq!(entry.weight, chain.weight(&header.hash()).unwrap().unwrap());
        assert_eq!(proofs[0].header.as_ref(), Some(&header));
    }

    // Section 0 does not cover height 13.
    let early = chain.cht_root(0).unwrap().unwrap();
    let response = serve_request(
        &chain,
        &ProtocolRequest::GetHelperTrieProofs(vec![HelperTrieRequest {
            section: 0,
            number: 13,
        }]),
    )
    .unwrap();
    let ProtocolResponse::HelperTrieProofs(proofs) = response else {
        panic!("wrong response kind: {response:?}");
    };
    if let Some(proof) = proofs.first() {
        assert_eq!(
            trie::verify_proof(early, &cht_entry_key(13), &proof.proof).unwrap(),
            None
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Indexing in several rounds stores the same sections as indexing all at once.
    #[test]
    fn sections_do_not_depend_on_how_the_chain_grew(
        stops in proptest::collection::vec(1_u64..40, 1..5),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut builder = ChainBuilder::new(test_genesis());
            builder.extend(40);

            let stepped = builder.open_chain(SyncMode::Light);
            let stepped_indexers = Indexers::open(&stepped);
            let mut stops = stops;
            stops.sort_unstable();
            for stop in stops {
                builder.import_into(&stepped, stop).await;
                stepped_indexers.process();
            }
            builder.import_into(&stepped, 40).await;
            assert_eq!(stepped_indexers.process(), 4);

            let at_once = builder.open_chain(SyncMode::Light);
            builder.import_into(&at_once, 40).await;
            assert_eq!(Indexers::open(&at_once).process(), 4);

            assert_eq!(digest(&stepped, 4), digest(&at_once, 4));
        });
    }
}
