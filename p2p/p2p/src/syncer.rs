//! The syncer, the task that keeps the [`Downloader`] pointed at the heaviest peer.
use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{interval, MissedTickBehavior},
};
use tracing::{instrument, Instrument};

use crate::downloader::{Downloader, SyncError, SyncTarget};

/// Starts syncs with heavier peers.
///
/// Every `check_interval`, the first time one interval after starting, the heaviest
/// connected peer is compared with our head, a sync is started if it is heavier and none
/// is running. Targets sent down `sync_rx`, blocks the
/// fetcher could not insert, start a sync straight away, replacing the running one if
/// they are heavier.
///
/// Failed syncs are retried on a later check.
#[instrument(level = "info", name = "syncer", skip_all)]
pub async fn syncer(
    downloader: Downloader,
    mut sync_rx: mpsc::Receiver<SyncTarget>,
    check_interval: Duration,
) {
    tracing::info!("starting the syncer");

    let mut check_sync_interval = interval(check_interval);
    check_sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Give the first connections a full interval to come in.
    check_sync_interval.reset();

    let mut syncs = JoinSet::new();
    let mut targets_open = true;

    loop {
        let target = tokio::select! {
            _ = check_sync_interval.tick() => {
                if downloader.is_syncing() {
                    continue;
                }
                let Some(target) = best_target(&downloader) else {
                    continue;
                };
                target
            }
            target = sync_rx.recv(), if targets_open => {
                let Some(target) = target else {
                    targets_open = false;
                    continue;
                };
                target
            }
            Some(_) = syncs.join_next() => continue,
        };

        tracing::debug!(peer = %target.peer, number = target.head.number, "starting sync");

        let downloader = downloader.clone();
        syncs.spawn(
            async move {
                match downloader.synchronise(target).await {
                    Ok(()) | Err(SyncError::Busy | SyncError::Cancelled) => (),
                    Err(e) => tracing::info!("sync will be retried: {e}"),
                }
            }
            .in_current_span(),
        );
    }
}

/// The heaviest peer, if it is heavier than our chain.
fn best_target(downloader: &Downloader) -> Option<SyncTarget> {
    let best = downloader.peer_set().best_peer()?;
    let head = best.head();

    let local = match downloader.chain().head_info() {
        Ok(local) => local,
        Err(e) => {
            tracing::warn!("failed to read our head: {e}");
            return None;
        }
    };

    tracing::trace!(
        ours = local.weight,
        theirs = head.weight,
        "checking connected peers to see if we are behind"
    );

    (head.weight > local.weight).then_some(SyncTarget {
        peer: best.id(),
        head,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cinder_test_utils::{
        chain::{test_genesis, ChainBuilder},
        mock::MockPeer,
    };
    use cinder_types::SyncMode;

    use super::*;
    use crate::{
        config::DownloaderConfig, distributor::RequestDistributor, retrieve::RetrieveManager,
        server_pool::ServerPool,
    };

    #[tokio::test]
    async fn syncs_with_a_heavier_peer_that_connects_later() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(40);
        let remote = builder.build().await;

        let chain = builder.open_chain(SyncMode::Full);
        let retriever = RetrieveManager::new(
            RequestDistributor::new(
                crate::peer_set::PeerSet::new(),
                Arc::new(ServerPool::new(Default::default())),
                Default::default(),
            ),
            Default::default(),
        );
        let downloader =
            Downloader::new(Arc::clone(&chain), retriever, DownloaderConfig::default()).unwrap();

        let (_sync_tx, sync_rx) = mpsc::channel(1);
        tokio::spawn(syncer(downloader.clone(), sync_rx, Duration::from_millis(20)));

        let (client, _handle) = MockPeer::new(1, remote)
            .connect(&chain, mpsc::channel(1).0)
            .await;
        downloader.peer_set().register(client).unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while chain.head_block().unwrap().number < 40 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(chain.head_block().unwrap(), builder.head());
    }

    #[tokio::test]
    async fn deferred_targets_start_a_sync() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(20);
        let remote = builder.build().await;

        let chain = builder.open_chain(SyncMode::Full);
        let retriever = RetrieveManager::new(
            RequestDistributor::new(
                crate::peer_set::PeerSet::new(),
                Arc::new(ServerPool::new(Default::default())),
                Default::default(),
            ),
            Default::default(),
        );
        let downloader =
            Downloader::new(Arc::clone(&chain), retriever, DownloaderConfig::default()).unwrap();

        let (client, _handle) = MockPeer::new(1, remote)
            .connect(&chain, mpsc::channel(1).0)
            .await;
        let target = SyncTarget {
            peer: client.id(),
            head: client.head(),
        };
        downloader.peer_set().register(client).unwrap();

        let (sync_tx, sync_rx) = mpsc::channel(1);
        // Long enough that only the deferred target can start the sync.
        tokio::spawn(syncer(downloader.clone(), sync_rx, Duration::from_secs(3600)));
        sync_tx.send(target).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while chain.head_block().unwrap().number < 20 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
