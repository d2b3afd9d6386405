//! In-memory peers serving a [`BlockChain`].
//!
//! A [`MockPeer`] runs a real connection over an in-memory pipe, its side answers
//! requests with [`serve_request`] unless a [`Fault`] says otherwise.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tower::service_fn;

use cinder_blockchain::{serve_request, BlockChain};
use cinder_p2p_core::{
    client::{Client, DoHandshakeRequest, DummyRequestHandler, Handshaker, OurNodeInfo},
    transports::memory_pair,
    ConnectionDirection, CoreSyncDataRequest, PeerAnnouncement, PeerId,
};
use cinder_types::{HeadInfo, Receipt, Transaction};
use cinder_wire::{
    BlockAnnouncement, Message, PeerCapabilities, ProtocolRequest, ProtocolResponse,
    ProtocolVersion,
};

use crate::TEST_NETWORK_ID;

/// How a [`MockPeer`] misbehaves.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Fault {
    /// Answers every request correctly.
    #[default]
    None,
    /// Never answers.
    Silent,
    /// Answers with responses of the right kind and length but wrong content.
    Corrupt,
    /// Answers correctly after a delay.
    Slow(Duration),
}

/// A peer serving a chain, see the [module docs](self).
pub struct MockPeer {
    id: PeerId,
    chain: Arc<BlockChain>,
    capabilities: PeerCapabilities,
    version: ProtocolVersion,
    fault: Fault,
}

impl MockPeer {
    /// A V2 peer serving both full and light requests.
    pub fn new(id: u64, chain: Arc<BlockChain>) -> Self {
        Self {
            id: PeerId(id),
            chain,
            capabilities: PeerCapabilities::FULL_SERVER | PeerCapabilities::LIGHT_SERVER,
            version: ProtocolVersion::V2,
            fault: Fault::None,
        }
    }

    #[must_use]
    pub const fn capabilities(mut self, capabilities: PeerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub const fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Connects to the peer from a node with `our_chain`.
    ///
    /// Announcements the peer sends are forwarded down `announcement_tx`.
    pub async fn connect(
        self,
        our_chain: &BlockChain,
        announcement_tx: mpsc::Sender<PeerAnnouncement>,
    ) -> (Client, MockPeerHandle) {
        let ((stream, sink), (remote_stream, remote_sink)) = memory_pair();

        let requests = Arc::new(AtomicUsize::new(0));
        let fault = Arc::new(Mutex::new(self.fault));

        let our_head = our_chain.head_info().expect("the chain has a head");
        let ours = Handshaker::new(
            OurNodeInfo {
                network_id: TEST_NETWORK_ID,
                genesis: our_chain.genesis_hash(),
                version: ProtocolVersion::V2,
                capabilities: PeerCapabilities::empty(),
            },
            service_fn(move |_: CoreSyncDataRequest| async move {
                Ok::<_, tower::BoxError>(our_head)
            }),
            DummyRequestHandler,
            announcement_tx,
        );

        let theirs = Handshaker::new(
            OurNodeInfo {
                network_id: TEST_NETWORK_ID,
                genesis: self.chain.genesis_hash(),
                version: self.version,
                capabilities: self.capabilities,
            },
            head_service(Arc::clone(&self.chain)),
            serving_service(
                Arc::clone(&self.chain),
                Arc::clone(&fault),
                Arc::clone(&requests),
            ),
            mpsc::channel(16).0,
        );

        let (client, server_side) = tokio::join!(
            ours.handshake(DoHandshakeRequest {
                peer_id: self.id,
                peer_stream: stream,
                peer_sink: sink,
                direction: ConnectionDirection::Outbound,
                permit: None,
            }),
            theirs.handshake(DoHandshakeRequest {
                peer_id: PeerId(0),
                peer_stream: remote_stream,
                peer_sink: remote_sink,
                direction: ConnectionDirection::Inbound,
                permit: None,
            })
        );

        (
            client.expect("mock peers share our genesis"),
            MockPeerHandle {
                chain: self.chain,
                requests,
                fault,
                server_side: server_side.expect("mock peers share our genesis"),
            },
        )
    }
}

/// Controls a connected [`MockPeer`].
pub struct MockPeerHandle {
    chain: Arc<BlockChain>,
    requests: Arc<AtomicUsize>,
    fault: Arc<Mutex<Fault>>,
    /// The peer's client for the connection to us.
    server_side: Client,
}

impl MockPeerHandle {
    /// The amount of requests the peer received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    pub const fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    /// Sends us a message.
    pub fn send(&self, message: Message) {
        self.server_side.announce(message);
    }

    /// Announces the peer's current head.
    pub fn announce_head(&self) {
        let head = self.chain.head_info().expect("the chain has a head");
        self.send(Message::NewBlockHashes(vec![BlockAnnouncement {
            hash: head.hash,
            number: head.number,
            weight: head.weight,
        }]));
    }

    /// The head we announced to the peer.
    pub fn our_announced_head(&self) -> HeadInfo {
        self.server_side.head()
    }

    pub fn disconnect(&self) {
        self.server_side.disconnect();
    }
}

fn head_service(
    chain: Arc<BlockChain>,
) -> impl cinder_p2p_core::CoreSyncSvc {
    service_fn(move |_: CoreSyncDataRequest| {
        let head = chain.head_info().map_err(tower::BoxError::from);
        async move { head }
    })
}

fn serving_service(
    chain: Arc<BlockChain>,
    fault: Arc<Mutex<Fault>>,
    requests: Arc<AtomicUsize>,
) -> impl cinder_p2p_core::ProtocolRequestHandler {
    service_fn(move |request: ProtocolRequest| {
        requests.fetch_add(1, Ordering::SeqCst);

        let fault = *fault.lock().unwrap_or_else(PoisonError::into_inner);
        let response = serve_request(&chain, &request).map_err(tower::BoxError::from);

        async move {
            let response = response?;
            match fault {
                Fault::None => Ok(response),
                Fault::Silent => Err("silent peer".into()),
                Fault::Corrupt => Ok(corrupt(response)),
                Fault::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
            }
        }
    })
}

fn corrupt(response: ProtocolResponse) -> ProtocolResponse {
    match response {
        ProtocolResponse::BlockHeaders(mut headers) => {
            for header in &mut headers {
                header.parent_hash[0] ^= 0xff;
            }
            ProtocolResponse::BlockHeaders(headers)
        }
        ProtocolResponse::BlockBodies(mut bodies) => {
            for body in &mut bodies {
                body.transactions.push(Transaction(vec![0xde, 0xad]));
            }
            ProtocolResponse::BlockBodies(bodies)
        }
        ProtocolResponse::Receipts(mut receipts) => {
            for list in &mut receipts {
                list.push(Receipt {
                    success: false,
                    logs: vec![],
                });
            }
            ProtocolResponse::Receipts(receipts)
        }
        ProtocolResponse::NodeData(mut nodes) => {
            for node in &mut nodes {
                node.push(0);
            }
            ProtocolResponse::NodeData(nodes)
        }
        ProtocolResponse::Proofs(mut proofs) => {
            for proof in &mut proofs {
                proof.push(vec![0; 8]);
            }
            ProtocolResponse::Proofs(proofs)
        }
        ProtocolResponse::HelperTrieProofs(mut proofs) => {
            for proof in &mut proofs {
                proof.proof.push(vec![0; 8]);
            }
            ProtocolResponse::HelperTrieProofs(proofs)
        }
    }
}

/// The announcement of `head`.
pub const fn announcement(head: HeadInfo) -> BlockAnnouncement {
    BlockAnnouncement {
        hash: head.hash,
        number: head.number,
        weight: head.weight,
    }
}

#[cfg(test)]
mod tests {
    use cinder_types::HashOrNumber;

    use super::*;
    use crate::chain::{test_genesis, ChainBuilder};

    #[tokio::test]
    async fn serves_and_counts_requests() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(8);
        let remote = builder.build().await;
        let local = builder.open_chain(cinder_types::SyncMode::Full);

        let (client, handle) = MockPeer::new(1, remote)
            .connect(&local, mpsc::channel(1).0)
            .await;

        assert_eq!(client.head().number, 8);

        let res = client
            .request(ProtocolRequest::GetBlockHeaders {
                origin: HashOrNumber::Number(1),
                amount: 4,
                skip: 0,
                reverse: false,
            })
            .await
            .unwrap();

        assert_eq!(res, ProtocolResponse::BlockHeaders(builder.headers(1, 4)));
        assert_eq!(handle.requests(), 1);
    }

    #[tokio::test]
    async fn silent_peers_do_not_answer() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(2);
        let remote = builder.build().await;
        let local = builder.open_chain(cinder_types::SyncMode::Full);

        let (client, _handle) = MockPeer::new(1, remote)
            .fault(Fault::Silent)
            .connect(&local, mpsc::channel(1).0)
            .await;

        let res = tokio::time::timeout(
            Duration::from_millis(100),
            client.request(ProtocolRequest::GetBlockBodies(vec![builder.head().hash()])),
        )
        .await;
        assert!(res.is_err());
    }
}
