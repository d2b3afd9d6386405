use std::sync::Arc;

use pretty_assertions::assert_eq;

use cinder_blockchain::{BlockChain, ChainError, KvExecutor};
use cinder_consensus::ConsensusEngine;
use cinder_database::{KeyValueStore, MemoryStore};
use cinder_test_utils::chain::{test_genesis, ChainBuilder};
use cinder_types::{ChainEvent, SyncMode};

fn builder(height: u64) -> ChainBuilder {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(height);
    builder
}

#[tokio::test]
async fn heavier_fork_becomes_canonical() {
    let main = builder(10);
    let chain = main.build().await;

    let mut fork = main.fork(6, 1).difficulty(2);
    fork.extend(4);

    let imported = chain
        .writer()
        .await
        .insert_blocks(fork.blocks().split_off(6))
        .await
        .unwrap();
    assert_eq!(imported, 4);

    assert_eq!(chain.head_block().unwrap(), fork.head());
    assert_eq!(chain.head_header().unwrap(), fork.head());
    assert_eq!(
        chain.canonical_hash(7).unwrap(),
        Some(fork.header(7).unwrap().hash())
    );
    assert_eq!(
        chain.canonical_hash(6).unwrap(),
        Some(main.header(6).unwrap().hash())
    );

    // The old branch stays stored.
    let old = main.header(10).unwrap();
    assert!(chain.has_header(&old.hash()).unwrap());
    assert!(!chain.is_canonical(old).unwrap());
    assert_eq!(
        chain.common_ancestor(old, &fork.head()).unwrap(),
        *main.header(6).unwrap()
    );
}

#[tokio::test]
async fn lighter_fork_is_a_side_chain() {
    let main = builder(10);
    let chain = main.build().await;
    let mut events = chain.subscribe();

    let mut fork = main.fork(8, 3);
    fork.extend(1);

    chain
        .writer()
        .await
        .insert_blocks(fork.blocks().split_off(8))
        .await
        .unwrap();

    assert_eq!(chain.head_block().unwrap(), main.head());
    let Ok(ChainEvent::ChainSide { header }) = events.try_recv() else {
        panic!("expected a side chain event");
    };
    assert_eq!(*header, fork.head());
}

#[tokio::test]
async fn light_chains_only_store_headers() {
    let builder = builder(8);
    let chain = builder.open_chain(SyncMode::Light);

    builder.import_into(&chain, 8).await;

    assert_eq!(chain.head_header().unwrap().number, 8);
    assert_eq!(chain.head().unwrap().number, 8);
    assert_eq!(chain.head_block().unwrap().number, 0);

    let hash = builder.header(3).unwrap().hash();
    assert!(chain.has_header(&hash).unwrap());
    assert_eq!(chain.body(&hash).unwrap(), None);
}

#[tokio::test]
async fn header_batches_are_checked() {
    let builder = builder(6);
    let chain = builder.open_chain(SyncMode::Light);
    let mut writer = chain.writer().await;

    let gapped = vec![
        builder.header(1).unwrap().clone(),
        builder.header(3).unwrap().clone(),
    ];
    assert!(matches!(
        writer.insert_headers(gapped).await,
        Err(ChainError::NotContiguous)
    ));

    assert!(matches!(
        writer.insert_headers(builder.headers(4, 5)).await,
        Err(ChainError::UnknownParent(_))
    ));

    assert_eq!(writer.insert_headers(builder.headers(1, 4)).await.unwrap(), 4);
    // Known headers are skipped.
    assert_eq!(writer.insert_headers(builder.headers(2, 6)).await.unwrap(), 2);
}

#[tokio::test]
async fn tampered_bodies_are_rejected() {
    let builder = builder(2);
    let chain = builder.open_chain(SyncMode::Full);

    let mut block = builder.block(1).unwrap().clone();
    block.body.transactions.pop();

    assert!(matches!(
        chain.writer().await.insert_blocks(vec![block]).await,
        Err(ChainError::BodyMismatch { number: 1 })
    ));
    assert_eq!(chain.head_block().unwrap().number, 0);
}

#[tokio::test]
async fn blocks_need_their_parent_state() {
    let builder = builder(3);
    let chain = builder.open_chain(SyncMode::Full);

    let mut writer = chain.writer().await;
    writer.insert_headers(builder.headers(1, 3)).await.unwrap();

    assert!(matches!(
        writer
            .insert_blocks(vec![builder.block(3).unwrap().clone()])
            .await,
        Err(ChainError::MissingState { number: 3 })
    ));
}

#[tokio::test]
async fn set_head_rewinds_both_heads() {
    let builder = builder(10);
    let chain = builder.build().await;

    let head = chain.writer().await.set_head(4).unwrap();

    assert_eq!(head, *builder.header(4).unwrap());
    assert_eq!(chain.head_header().unwrap().number, 4);
    assert_eq!(chain.head_block().unwrap().number, 4);
    assert_eq!(chain.canonical_hash(5).unwrap(), None);
    assert!(chain.has_header(&builder.header(5).unwrap().hash()).unwrap());

    assert!(matches!(
        chain.writer().await.set_head(7),
        Err(ChainError::UnknownNumber(7))
    ));
}

#[tokio::test]
async fn fast_sync_commits_a_pivot() {
    let builder = builder(6);
    let chain = builder.open_chain(SyncMode::Fast);
    let pivot = builder.header(6).unwrap().clone();

    let mut writer = chain.writer().await;
    writer.insert_headers(builder.headers(1, 6)).await.unwrap();

    let blocks = (1..=6)
        .map(|n| {
            (
                builder.block(n).unwrap().clone(),
                builder.receipts(n).unwrap().to_vec(),
            )
        })
        .collect();
    assert_eq!(writer.insert_receipt_chain(blocks).unwrap(), 6);
    assert_eq!(chain.head_block().unwrap().number, 0);

    assert!(matches!(
        writer.commit_pivot(&pivot),
        Err(ChainError::MissingState { number: 6 })
    ));

    chain
        .write_state_nodes(builder.state_nodes().values().cloned())
        .unwrap();
    writer.commit_pivot(&pivot).unwrap();

    assert_eq!(chain.head_block().unwrap(), pivot);
    assert_eq!(
        chain.state_value(pivot.state_root, b"alloc-2").unwrap(),
        Some(vec![2; 4])
    );
}

#[tokio::test]
async fn imports_emit_logs_then_the_head() {
    let builder = builder(2);
    let chain = builder.open_chain(SyncMode::Full);
    let mut events = chain.subscribe();

    builder.import_into(&chain, 2).await;

    let Ok(ChainEvent::Logs { number, logs, .. }) = events.try_recv() else {
        panic!("expected logs");
    };
    assert_eq!(number, 1);
    assert!(!logs.is_empty());

    let Ok(ChainEvent::ChainHead { header }) = events.try_recv() else {
        panic!("expected a new head");
    };
    assert_eq!(header.number, 1);
}

#[test]
fn a_store_keeps_its_genesis() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let open = |extra: &[u8]| {
        let mut genesis = test_genesis();
        genesis.extra = extra.to_vec();
        BlockChain::open(
            Arc::clone(&store),
            &genesis,
            Arc::new(ConsensusEngine::Faker),
            Arc::new(KvExecutor),
            SyncMode::Full,
        )
    };

    let first = open(b"one").unwrap().genesis_hash();
    assert_eq!(open(b"one").unwrap().genesis_hash(), first);
    assert!(matches!(open(b"two"), Err(ChainError::GenesisMismatch)));
}
