//! Nodes talking to each other over TCP and in-memory peers, driven through the public API.
use std::{future::Future, sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cinder_blockchain::BlockChain;
use cinder_p2p::{
    initialize_network, DownloaderState, NetworkInterface, Outcome, P2PConfig, PeerSet,
    RequestCriteria, RequestDistributor, RetrieveConfig, RetrieveManager, RetrieveRequest,
    ServerPool,
};
use cinder_p2p_core::PeerId;
use cinder_test_utils::{
    chain::{test_genesis, ChainBuilder},
    mock::{Fault, MockPeer},
    TEST_NETWORK_ID,
};
use cinder_types::{HashOrNumber, SyncMode};
use cinder_wire::{ProtocolRequest, ProtocolResponse};

async fn start_node(chain: Arc<BlockChain>, config: P2PConfig) -> NetworkInterface {
    initialize_network(chain, TEST_NETWORK_ID, config)
        .await
        .unwrap()
}

fn listening() -> P2PConfig {
    P2PConfig {
        listen_addr: Some("127.0.0.1:0".parse().unwrap()),
        ..Default::default()
    }
}

fn dialing(server: &NetworkInterface, sync_check_interval: Duration) -> P2PConfig {
    P2PConfig {
        bootnodes: vec![server.local_addr().unwrap()],
        sync_check_interval,
        ..Default::default()
    }
}

async fn eventually<F: Future<Output = ()>>(what: &str, fut: F) {
    tokio::time::timeout(Duration::from_secs(30), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn head_reaches(chain: &BlockChain, number: u64) {
    while chain.head_block().unwrap().number < number {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn connected(peer_set: &PeerSet) {
    while peer_set.is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_syncs_from_its_bootnode() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(100);

    let server = start_node(builder.build().await, listening()).await;

    let chain = builder.open_chain(SyncMode::Full);
    let client = start_node(
        Arc::clone(&chain),
        dialing(&server, Duration::from_millis(50)),
    )
    .await;

    eventually("the client to sync", head_reaches(&chain, 100)).await;

    assert_eq!(chain.head_block().unwrap(), builder.head());
    for number in 1..=100 {
        let header = chain.header_by_number(number).unwrap().unwrap();
        let parent = chain.header_by_number(number - 1).unwrap().unwrap();
        assert_eq!(header.parent_hash, parent.hash());
    }

    eventually("the sync to finish", async {
        while client.downloader().state() != DownloaderState::Done {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    // The server was dialed, so it is in the client's pool under its address.
    let server_id = PeerId::from_addr(&server.local_addr().unwrap());
    let entry = client.server_pool().entry(&server_id).unwrap();
    assert!(entry.successes > 0);
    assert!(client.peer_set().contains(&server_id));

    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn announced_orphan_is_synced_by_the_downloader() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(14);

    // The server is 3 blocks ahead before anyone connects, so nothing announces 11..=13.
    let server_chain = builder.open_chain(SyncMode::Full);
    builder.import_into(&server_chain, 13).await;
    let server = start_node(Arc::clone(&server_chain), listening()).await;

    let chain = builder.open_chain(SyncMode::Full);
    builder.import_into(&chain, 10).await;
    // Only the fetcher's deferral can start a sync.
    let client = start_node(
        Arc::clone(&chain),
        dialing(&server, Duration::from_secs(3600)),
    )
    .await;

    eventually("the nodes to connect", async {
        connected(client.peer_set()).await;
        connected(server.peer_set()).await;
    })
    .await;
    assert_eq!(chain.head_block().unwrap().number, 10);

    // The server announces 14, the client does not have 13.
    server_chain
        .writer()
        .await
        .insert_blocks(vec![builder.block(14).unwrap().clone()])
        .await
        .unwrap();

    eventually("the client to sync", head_reaches(&chain, 14)).await;
    assert_eq!(chain.head_block().unwrap(), builder.head());

    let stats = client.fetcher().stats();
    assert_eq!(stats.announces_in, 1);
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.body_fetches, 0);
    assert_eq!(stats.imported, 0);
}

#[tokio::test]
async fn timed_out_request_is_retried_on_another_peer() {
    let mut builder = ChainBuilder::new(test_genesis());
    builder.extend(10);
    let remote = builder.build().await;
    let chain = builder.open_chain(SyncMode::Full);

    let peer_set = PeerSet::new();
    let server_pool = Arc::new(ServerPool::new(Default::default()));
    let retriever = RetrieveManager::new(
        RequestDistributor::new(
            Arc::clone(&peer_set),
            Arc::clone(&server_pool),
            Default::default(),
        ),
        RetrieveConfig {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    );

    let (silent, _silent_handle) = MockPeer::new(1, Arc::clone(&remote))
        .fault(Fault::Silent)
        .connect(&chain, mpsc::channel(1).0)
        .await;
    let (honest, honest_handle) = MockPeer::new(2, remote)
        .connect(&chain, mpsc::channel(1).0)
        .await;
    peer_set.register(silent).unwrap();
    peer_set.register(honest).unwrap();

    // The silent peer ranks first.
    server_pool.report(
        PeerId(1),
        Outcome::Success {
            latency: Duration::from_millis(1),
        },
    );
    let silent_score = server_pool.rank_score(&PeerId(1));
    let honest_score = server_pool.rank_score(&PeerId(2));
    assert!(silent_score > honest_score);

    let expected = builder.header(7).unwrap().clone();
    let hash = expected.hash();
    let req = RetrieveRequest::new(
        ProtocolRequest::GetBlockHeaders {
            origin: HashOrNumber::Number(7),
            amount: 1,
            skip: 0,
            reverse: false,
        },
        RequestCriteria::full_server(),
        move |res| match res {
            ProtocolResponse::BlockHeaders(headers)
                if headers.len() == 1 && headers[0].hash() == hash =>
            {
                Ok(())
            }
            ProtocolResponse::BlockHeaders(_)
            | ProtocolResponse::BlockBodies(_)
            | ProtocolResponse::Receipts(_)
            | ProtocolResponse::NodeData(_)
            | ProtocolResponse::Proofs(_)
            | ProtocolResponse::HelperTrieProofs(_) => {
                Err(cinder_p2p::InvalidResponse("not header 7"))
            }
        },
    );

    let retrieved = retriever
        .retrieve(req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retrieved.peer, PeerId(2));
    assert_eq!(
        retrieved.response,
        ProtocolResponse::BlockHeaders(vec![expected])
    );
    assert_eq!(honest_handle.requests(), 1);

    let stats = retriever.stats();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.timeouts, 1);

    assert!(server_pool.rank_score(&PeerId(1)) < silent_score);
    assert!(server_pool.rank_score(&PeerId(2)) > honest_score);
}
