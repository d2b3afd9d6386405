//! A [`Client`] whose remote end is driven by the test.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower::service_fn;

use cinder_p2p_core::{
    client::{Client, DoHandshakeRequest, DummyRequestHandler, Handshaker, OurNodeInfo},
    transports::{memory_pair, MemorySink, MemoryStream},
    ConnectionDirection, CoreSyncDataRequest, PeerId,
};
use cinder_types::{Hash, HeadInfo};
use cinder_wire::{Message, PeerCapabilities, ProtocolVersion, Status};

use crate::TEST_NETWORK_ID;

/// The genesis hash [`connected_client`] handshakes with.
pub const PEER_TEST_GENESIS: Hash = [0xc1; 32];

/// The remote end of a [`connected_client`].
///
/// Dropping it closes the connection.
pub struct RemotePeer {
    pub stream: MemoryStream,
    pub sink: MemorySink,
}

/// The head a peer advertising `weight` claims.
pub fn head_with_weight(weight: u128) -> HeadInfo {
    let number = u64::try_from(weight).unwrap_or(u64::MAX);
    let mut hash = [0; 32];
    hash[..8].copy_from_slice(&number.to_be_bytes());

    HeadInfo {
        hash,
        number,
        weight,
    }
}

/// Handshakes a [`Client`] for peer `id` over an in-memory pipe.
///
/// The remote end advertises a head of `weight` and `capabilities`, then does nothing
/// unless the test drives it through the returned [`RemotePeer`].
pub async fn connected_client(
    id: PeerId,
    weight: u128,
    capabilities: PeerCapabilities,
) -> (Client, RemotePeer) {
    let ((stream, sink), (mut remote_stream, mut remote_sink)) = memory_pair();
    let (announcement_tx, _) = mpsc::channel(1);

    let handshaker = Handshaker::new(
        OurNodeInfo {
            network_id: TEST_NETWORK_ID,
            genesis: PEER_TEST_GENESIS,
            version: ProtocolVersion::V2,
            capabilities: PeerCapabilities::empty(),
        },
        service_fn(|_: CoreSyncDataRequest| async { Ok::<_, tower::BoxError>(head_with_weight(0)) }),
        DummyRequestHandler,
        announcement_tx,
    );

    let remote = async {
        remote_sink
            .send(Message::Status(Status {
                version: ProtocolVersion::V2,
                network_id: TEST_NETWORK_ID,
                genesis: PEER_TEST_GENESIS,
                head: head_with_weight(weight),
                capabilities,
            }))
            .await
            .expect("the pipe is open");

        let Some(Ok(Message::Status(_))) = remote_stream.next().await else {
            panic!("expected the client's status");
        };
    };

    let (client, ()) = tokio::join!(
        handshaker.handshake(DoHandshakeRequest {
            peer_id: id,
            peer_stream: stream,
            peer_sink: sink,
            direction: ConnectionDirection::Outbound,
            permit: None,
        }),
        remote
    );

    (
        client.expect("handshake with a matching peer succeeds"),
        RemotePeer {
            stream: remote_stream,
            sink: remote_sink,
        },
    )
}
