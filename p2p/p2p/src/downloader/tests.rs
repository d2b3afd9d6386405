use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use cinder_blockchain::BlockChain;
use cinder_test_utils::{
    chain::{test_genesis, ChainBuilder},
    mock::{Fault, MockPeer, MockPeerHandle},
};
use cinder_types::{SyncMode, SyncStatus};

use super::*;
use crate::{
    config::{RetrieveConfig, DownloaderConfig},
    distributor::RequestDistributor,
    peer_set::PeerSet,
    server_pool::ServerPool,
};

struct Node {
    chain: Arc<BlockChain>,
    downloader: Downloader,
}

impl Node {
    /// A node with `builder`'s chain up to `height`.
    async fn new(builder: &ChainBuilder, height: u64, config: DownloaderConfig) -> Self {
        let chain = builder.open_chain(config.mode);
        builder.import_into(&chain, height).await;

        let distributor = RequestDistributor::new(
            PeerSet::new(),
            Arc::new(ServerPool::new(Default::default())),
            Default::default(),
        );
        let retriever = RetrieveManager::new(
            distributor,
            RetrieveConfig {
                max_retries: 2,
                request_timeout: Duration::from_millis(200),
                assign_timeout: Duration::from_secs(1),
            },
        );

        let downloader = Downloader::new(Arc::clone(&chain), retriever, config).unwrap();

        Self { chain, downloader }
    }

    async fn connect(&self, peer: MockPeer) -> (SyncTarget, MockPeerHandle) {
        let (client, handle) = peer.connect(&self.chain, mpsc::channel(16).0).await;
        let target = SyncTarget {
            peer: client.id(),
            head: client.head(),
        };
        self.downloader.peer_set().register(client).unwrap();
        (target, handle)
    }

    async fn wait_until_syncing(&self) {
        while !self.downloader.is_syncing()
            || self.downloader.state() == DownloaderState::Idle
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Small batches so even short chains take several of them.
fn config(mode: SyncMode) -> DownloaderConfig {
    DownloaderConfig {
        mode,
        header_batch: 16,
        block_batch: 8,
        node_batch: 32,
        stall_timeout: Duration::from_secs(3),
        pivot_distance: 8,
        ..Default::default()
    }
}

/// Checks every canonical header of `chain` links to the one below it.
fn assert_linked(chain: &BlockChain) {
    let head = chain.head_header().unwrap();
    for number in 1..=head.number {
        let header = chain.header_by_number(number).unwrap().unwrap();
        let parent = chain.header_by_number(number - 1).unwrap().unwrap();
        assert_eq!(header.parent_hash, parent.hash(), "header {number} does not link");
    }
}

#[tokio::test]
async fn full_sync_reaches_the_peer_head() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(100);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Full)).await;
    let (target, _handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), builder.head());
    assert_eq!(node.downloader.state(), DownloaderState::Done);
    assert_eq!(
        node.downloader.progress(),
        SyncStatus {
            starting_height: 0,
            current_height: 100,
            highest_known_height: 100,
        }
    );
    assert_linked(&node.chain);

    let stats = node.downloader.stats();
    assert_eq!(stats.headers_in, 100);
    // every fifth block is empty
    assert_eq!(stats.bodies_in, 80);
    assert_eq!(stats.receipts_in, 0);
}

#[tokio::test]
async fn light_sync_only_fetches_headers() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(50);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Light)).await;
    let (target, _handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_header().unwrap(), builder.head());
    assert!(!node.chain.has_body(&builder.header(1).unwrap().hash()).unwrap());
    assert_eq!(node.downloader.stats().bodies_in, 0);
    assert_linked(&node.chain);
}

#[tokio::test]
async fn fast_sync_downloads_the_pivot_state() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(60);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Fast)).await;
    let (target, _handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    let head = builder.head();
    assert_eq!(node.chain.head_block().unwrap(), head);
    assert!(node.chain.has_state(&head.state_root).unwrap());

    // below the pivot receipts were downloaded, not produced
    let below_pivot = builder.header(10).unwrap().hash();
    assert_eq!(
        node.chain.receipts(&below_pivot).unwrap().as_deref(),
        builder.receipts(10)
    );
    // and no state was built
    assert!(!node.chain.has_state(&builder.header(10).unwrap().state_root).unwrap());

    let stats = node.downloader.stats();
    assert!(stats.states_in > 0);
    assert!(stats.receipts_in > 0);
}

#[tokio::test]
async fn recent_fork_is_found_in_the_first_span() {
    let mut main = ChainBuilder::new(test_genesis());
    main.extend(30);
    let mut fork = main.fork(30, 1);
    fork.extend(10);
    main.extend(20);
    let remote = main.build().await;

    let node = Node::new(&fork, 40, config(SyncMode::Full)).await;
    let (target, handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), main.head());
    assert_eq!(
        node.chain.canonical_hash(35).unwrap(),
        Some(main.header(35).unwrap().hash())
    );
    assert_linked(&node.chain);
    // One span request and 2 header batches. The header batches are cut into body requests of up
    // to 8, 31..=38, 39..=46 and 47..=50.
    assert_eq!(handle.requests(), 1 + 2 + 3);
}

#[tokio::test]
async fn deep_fork_is_binary_searched() {
    let mut main = ChainBuilder::new(test_genesis());
    main.extend(10);
    let mut fork = main.fork(10, 1);
    fork.extend(50);
    main.extend(90);
    let remote = main.build().await;

    let node = Node::new(&fork, 60, config(SyncMode::Full)).await;
    let (target, _handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), main.head());
    assert_eq!(
        node.chain.canonical_hash(11).unwrap(),
        Some(main.header(11).unwrap().hash())
    );
    assert_linked(&node.chain);
}

#[tokio::test]
async fn fork_below_the_rollback_limit_fails() {
    let mut main = ChainBuilder::new(test_genesis());
    main.extend(10);
    let mut fork = main.fork(10, 1);
    fork.extend(50);
    main.extend(90);
    let remote = main.build().await;

    let node = Node::new(
        &fork,
        60,
        DownloaderConfig {
            max_reorg_depth: 20,
            ..config(SyncMode::Full)
        },
    )
    .await;
    let (target, _handle) = node.connect(MockPeer::new(1, remote)).await;

    let res = node.downloader.synchronise(target).await;

    assert!(matches!(res, Err(SyncError::ReorgTooDeep)));
    assert_eq!(node.downloader.state(), DownloaderState::Failed);
    assert_eq!(node.chain.head_block().unwrap(), fork.head());
}

#[tokio::test]
async fn silent_sync_peer_is_replaced() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(40);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Full)).await;
    let (silent, _silent_handle) = node
        .connect(MockPeer::new(1, Arc::clone(&remote)).fault(Fault::Silent))
        .await;
    let (_, honest) = node.connect(MockPeer::new(2, remote)).await;

    node.downloader.synchronise(silent).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), builder.head());
    assert!(honest.requests() > 0);

    let stats = node.downloader.stats();
    assert!(stats.stalls >= 1);
    assert!(stats.timed_out >= 1);
}

#[tokio::test]
async fn corrupt_bodies_are_dropped_and_fetched_elsewhere() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(60);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Full)).await;
    let (target, _honest) = node.connect(MockPeer::new(1, Arc::clone(&remote))).await;
    let (_, corrupt) = node
        .connect(MockPeer::new(2, remote).fault(Fault::Corrupt))
        .await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), builder.head());
    assert_eq!(node.downloader.stats().dropped, u64::try_from(corrupt.requests()).unwrap());
}

#[tokio::test]
async fn equal_target_is_busy_and_heavier_target_preempts() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(60);
    let slow_remote = builder.build().await;
    builder.extend(20);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Full)).await;
    let (slow, _slow_handle) = node
        .connect(MockPeer::new(1, slow_remote).fault(Fault::Slow(Duration::from_millis(30))))
        .await;
    let (heavier, _handle) = node.connect(MockPeer::new(2, remote)).await;

    let downloader = node.downloader.clone();
    let first = tokio::spawn(async move { downloader.synchronise(slow).await });
    node.wait_until_syncing().await;

    assert!(matches!(
        node.downloader.synchronise(slow).await,
        Err(SyncError::Busy)
    ));

    node.downloader.synchronise(heavier).await.unwrap();

    assert!(matches!(first.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(node.chain.head_block().unwrap(), builder.head());
    assert_eq!(node.downloader.state(), DownloaderState::Done);
}

#[tokio::test]
async fn cancel_stops_the_sync() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(100);
    let remote = builder.build().await;

    let node = Node::new(&builder, 0, config(SyncMode::Full)).await;
    let (target, _handle) = node
        .connect(MockPeer::new(1, remote).fault(Fault::Slow(Duration::from_millis(30))))
        .await;

    let downloader = node.downloader.clone();
    let sync = tokio::spawn(async move { downloader.synchronise(target).await });
    node.wait_until_syncing().await;

    node.downloader.cancel();

    assert!(matches!(sync.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(node.downloader.state(), DownloaderState::Cancelled);
    assert!(!node.downloader.is_syncing());
    assert!(node.chain.head_block().unwrap().number < 100);
}

#[tokio::test]
async fn lighter_target_is_ignored() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(10);
    let remote = builder.build().await;
    builder.extend(10);

    let node = Node::new(&builder, 20, config(SyncMode::Full)).await;
    let (target, handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(handle.requests(), 0);
    assert_eq!(node.downloader.state(), DownloaderState::Idle);
}

#[tokio::test]
async fn mode_must_fit_the_chain() {
    let builder = ChainBuilder::new(test_genesis());
    let chain = builder.open_chain(SyncMode::Light);
    let retriever = RetrieveManager::new(
        RequestDistributor::new(
            PeerSet::new(),
            Arc::new(ServerPool::new(Default::default())),
            Default::default(),
        ),
        RetrieveConfig::default(),
    );

    let res = Downloader::new(chain, retriever, config(SyncMode::Full));
    assert!(matches!(res, Err(SyncError::ModeMismatch)));
}

#[tokio::test]
async fn zero_batch_sizes_fetch_one_at_a_time() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(6);
    let remote = builder.build().await;

    let node = Node::new(
        &builder,
        0,
        DownloaderConfig {
            header_batch: 0,
            block_batch: 0,
            ..config(SyncMode::Full)
        },
    )
    .await;
    let (target, handle) = node.connect(MockPeer::new(1, remote)).await;

    node.downloader.synchronise(target).await.unwrap();

    assert_eq!(node.chain.head_block().unwrap(), builder.head());
    assert_eq!(node.downloader.stats().stalls, 0);
    assert_eq!(node.downloader.stats().headers_in, 6);
    // At least a header request and a body request per block, empty blocks need no body.
    let empty = (1..=6)
        .filter(|n| builder.header(*n).unwrap().has_empty_body())
        .count();
    assert!(handle.requests() >= 6 + 6 - empty);
}
