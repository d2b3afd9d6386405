//! # Head Broadcast
//!
//! Tells connected peers about our new heads so they can fetch the blocks from us.
//!
//! Only peers lighter than the new head are told, a peer that already announced a
//! heavier head to us does not need ours.
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::instrument;

use cinder_blockchain::BlockChain;
use cinder_types::ChainEvent;
use cinder_wire::{BlockAnnouncement, Message};

use crate::peer_set::PeerSet;

/// Announces every new canonical head to the lighter peers in `peer_set`.
///
/// Returns when the chain is dropped.
#[instrument(level = "info", name = "broadcast", skip_all)]
pub(crate) async fn broadcast_heads(chain: Arc<BlockChain>, peer_set: Arc<PeerSet>) {
    let mut events = chain.subscribe();

    loop {
        let header = match events.recv().await {
            Ok(ChainEvent::ChainHead { header }) => header,
            Ok(ChainEvent::ChainSide { .. } | ChainEvent::Logs { .. }) => continue,
            // The next head covers the ones we missed.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "lagged behind chain events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        let hash = header.hash();
        let weight = match chain.weight(&hash) {
            Ok(Some(weight)) => weight,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("failed to read the weight of our head: {e}");
                continue;
            }
        };

        let announcement = BlockAnnouncement {
            hash,
            number: header.number,
            weight,
        };

        let mut told = 0_usize;
        for peer in peer_set.peers() {
            if peer.head().weight < weight {
                peer.client.announce(Message::NewBlockHashes(vec![announcement]));
                told += 1;
            }
        }

        tracing::trace!(number = header.number, told, "announced new head");
    }
}
