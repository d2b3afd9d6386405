//! On-demand lookups from a light chain against in-memory serving peers.
use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cinder_blockchain::BlockChain;
use cinder_chain_indexer::{ChainIndexer, ChainIndexerConfig, ChtIndexer};
use cinder_light::{OdrConfig, OdrError, OnDemandRetriever};
use cinder_p2p::{PeerSet, RequestDistributor, RetrieveManager, ServerPool};
use cinder_test_utils::{
    chain::{test_genesis, ChainBuilder},
    mock::{Fault, MockPeer, MockPeerHandle},
};
use cinder_types::SyncMode;

const CHT_SECTION_SIZE: u64 = 10;

struct Setup {
    builder: ChainBuilder,
    /// The full chain the peers serve.
    server: Arc<BlockChain>,
    /// Our light chain, with headers up to `light_height`.
    light: Arc<BlockChain>,
    retriever: RetrieveManager,
    odr: OnDemandRetriever,
    handles: Vec<MockPeerHandle>,
}

async fn setup(light_height: u64, faults: &[Fault]) -> Setup {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(20);
    let server = builder.build().await;

    let cht = ChainIndexer::new(
        Arc::clone(&server),
        ChtIndexer::new(),
        ChainIndexerConfig {
            section_size: CHT_SECTION_SIZE,
            confirmations: 0,
        },
    )
    .unwrap();
    cht.process().unwrap();

    let light = builder.open_chain(SyncMode::Light);
    builder.import_into(&light, light_height).await;

    let peer_set = PeerSet::new();
    let mut handles = Vec::new();
    for (id, fault) in (1..).zip(faults) {
        let (client, handle) = MockPeer::new(id, Arc::clone(&server))
            .fault(*fault)
            .connect(&light, mpsc::channel(1).0)
            .await;
        peer_set.register(client).unwrap();
        handles.push(handle);
    }

    let retriever = RetrieveManager::new(
        RequestDistributor::new(
            peer_set,
            Arc::new(ServerPool::new(Default::default())),
            Default::default(),
        ),
        Default::default(),
    );
    let odr = OnDemandRetriever::new(
        Arc::clone(&light),
        retriever.clone(),
        OdrConfig {
            cht_section_size: CHT_SECTION_SIZE,
        },
    );

    Setup {
        builder,
        server,
        light,
        retriever,
        odr,
        handles,
    }
}

#[tokio::test]
async fn concurrent_identical_lookups_share_one_request() {
    let setup = setup(20, &[Fault::Slow(Duration::from_millis(100))]).await;
    let block = setup.builder.block(3).unwrap().clone();
    let cancel = CancellationToken::new();

    let bodies =
        join_all((0..8).map(|_| setup.odr.get_block_body(block.hash(), &cancel))).await;

    for body in bodies {
        assert_eq!(body.unwrap(), block.body);
    }
    assert_eq!(setup.handles[0].requests(), 1);

    let stats = setup.retriever.stats();
    assert_eq!(stats.requests, 8);
    assert_eq!(stats.coalesced, 7);
    assert_eq!(stats.sent, 1);

    // Stored, so the next lookup stays local.
    assert_eq!(
        setup.light.body(&block.hash()).unwrap(),
        Some(block.body.clone())
    );
    assert_eq!(
        setup.odr.get_block_body(block.hash(), &cancel).await.unwrap(),
        block.body
    );
    assert_eq!(setup.handles[0].requests(), 1);
}

#[tokio::test]
async fn corrupt_bodies_are_refetched_from_another_peer() {
    let setup = setup(20, &[Fault::Corrupt, Fault::None]).await;
    let block = setup.builder.block(7).unwrap().clone();

    let body = setup
        .odr
        .get_block_body(block.hash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(body, block.body);
    assert_eq!(setup.handles[1].requests(), 1);
}

#[tokio::test]
async fn empty_bodies_and_receipts_need_no_request() {
    let setup = setup(20, &[Fault::None]).await;
    // Every fifth block is empty.
    let empty = setup.builder.header(10).unwrap().hash();
    let cancel = CancellationToken::new();

    let body = setup.odr.get_block_body(empty, &cancel).await.unwrap();
    assert!(body.transactions.is_empty());
    let receipts = setup.odr.get_receipts(empty, &cancel).await.unwrap();
    assert!(receipts.is_empty());
    assert_eq!(setup.handles[0].requests(), 0);
}

#[tokio::test]
async fn receipts_are_checked_and_stored() {
    let setup = setup(20, &[Fault::None]).await;
    let hash = setup.builder.header(4).unwrap().hash();
    let expected = setup.builder.receipts(4).unwrap().to_vec();

    let receipts = setup
        .odr
        .get_receipts(hash, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipts, expected);
    assert_eq!(setup.light.receipts(&hash).unwrap(), Some(expected));
}

#[tokio::test]
async fn unknown_blocks_are_not_requested() {
    let setup = setup(5, &[Fault::None]).await;
    let hash = setup.builder.header(12).unwrap().hash();

    let err = setup
        .odr
        .get_block_body(hash, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OdrError::UnknownBlock(h) if h == hash));
    assert_eq!(setup.handles[0].requests(), 0);
}

#[tokio::test]
async fn state_is_proven_against_its_root() {
    let setup = setup(20, &[Fault::None]).await;
    let root = setup.builder.header(12).unwrap().state_root;
    let cancel = CancellationToken::new();

    for key in [&b"key-3"[..], b"key-17", b"not a key"] {
        let expected = setup.server.state_value(root, key).unwrap();
        assert_eq!(
            setup.odr.get_trie_node(root, key, &cancel).await.unwrap(),
            expected
        );
    }
    let sent = setup.handles[0].requests();
    assert!(sent >= 1);

    // The proof nodes were stored.
    assert_eq!(
        setup.odr.get_trie_node(root, b"key-3", &cancel).await.unwrap(),
        setup.server.state_value(root, b"key-3").unwrap()
    );
    assert_eq!(setup.handles[0].requests(), sent);

    let node = setup.odr.get_node_data(root, &cancel).await.unwrap();
    assert_eq!(Some(node), setup.server.state_node(&root).unwrap());
}

#[tokio::test]
async fn headers_are_proven_against_a_trusted_cht_root() {
    // Only genesis is stored, the CHT root of section 1 is trusted.
    let setup = setup(0, &[Fault::None]).await;
    let root = setup.server.cht_root(1).unwrap().unwrap();
    setup.light.write_trusted_cht_root(1, root).unwrap();
    let cancel = CancellationToken::new();

    let expected = setup.builder.header(13).unwrap().clone();
    let header = setup.odr.get_header_by_number(13, &cancel).await.unwrap();

    assert_eq!(header, expected);
    assert_eq!(setup.light.header(&expected.hash()).unwrap(), Some(expected));

    // Genesis is local, section 0 and 2 have no trusted root.
    assert_eq!(
        setup.odr.get_header_by_number(0, &cancel).await.unwrap(),
        *setup.light.genesis()
    );
    assert!(matches!(
        setup.odr.get_header_by_number(4, &cancel).await,
        Err(OdrError::NotIndexed { number: 4 })
    ));
    assert!(matches!(
        setup.odr.get_header_by_number(25, &cancel).await,
        Err(OdrError::NotIndexed { number: 25 })
    ));
    assert_eq!(setup.handles[0].requests(), 1);
}

#[tokio::test]
async fn rewound_cht_sections_are_not_trusted() {
    let setup = setup(20, &[Fault::None]).await;
    let light_cht = ChainIndexer::new(
        Arc::clone(&setup.light),
        ChtIndexer::new(),
        ChainIndexerConfig {
            section_size: CHT_SECTION_SIZE,
            confirmations: 0,
        },
    )
    .unwrap();
    assert_eq!(light_cht.process().unwrap(), 2);
    assert!(setup.light.cht_root(1).unwrap().is_some());

    // The section is still stored, its last block is no longer canonical.
    setup.light.writer().await.set_head(5).unwrap();
    let cancel = CancellationToken::new();

    assert!(matches!(
        setup.odr.get_header_by_number(13, &cancel).await,
        Err(OdrError::NotIndexed { number: 13 })
    ));
    assert_eq!(setup.handles[0].requests(), 0);
}

#[tokio::test]
async fn cancelled_lookups_return_promptly() {
    let setup = setup(20, &[Fault::Silent]).await;
    let hash = setup.builder.header(8).unwrap().hash();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        setup.odr.get_receipts(hash, &cancel),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(err.is_cancelled());
}
