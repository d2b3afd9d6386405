use std::{collections::VecDeque, sync::Arc};

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cinder_blockchain::ChainError;
use cinder_helper::cast::usize_to_u64;
use cinder_types::{Block, BlockBody, Hash, Header, Receipt};
use cinder_wire::{ProtocolRequest, ProtocolResponse};

use crate::{
    distributor::RequestCriteria,
    retrieve::{InvalidResponse, RetrieveManager, RetrieveRequest},
};

use super::{
    block_queue::BlockQueue, counting_validator, retrieve, Counters, DownloaderState,
    SyncAttempt, SyncError,
};

/// A block and, below the fast sync pivot, its receipts.
type FetchedBlock = (Block, Option<Vec<Receipt>>);

/// Blocks waiting for the pivot state in fast sync.
#[derive(Default)]
struct FastSyncProgress {
    pivot: Option<Header>,
    above_pivot: Vec<Block>,
}

impl SyncAttempt {
    /// Fetches the bodies, and receipts at or below `pivot`, for the header batches coming down
    /// `batches` and imports the blocks in height order.
    ///
    /// With a `pivot` the blocks at or below it are stored without being executed, once every
    /// block is fetched the pivot's state is downloaded and the blocks above it are executed.
    pub(super) async fn fetch_blocks(
        &self,
        mut batches: mpsc::Receiver<Vec<Header>>,
        first: u64,
        pivot: Option<u64>,
    ) -> Result<(), SyncError> {
        let max_outstanding = self.config.max_outstanding.max(1);
        let block_batch = self.config.block_batch.max(1);

        let mut queue = BlockQueue::new(first);
        let mut in_flight = JoinSet::new();
        let mut pending = VecDeque::new();
        let mut headers_done = false;
        let mut fast = FastSyncProgress::default();

        loop {
            while in_flight.len() < max_outstanding {
                let Some(chunk) = pending.pop_front() else {
                    break;
                };
                self.spawn_chunk(&mut in_flight, chunk, pivot);
            }

            if headers_done && pending.is_empty() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                batch = batches.recv(), if !headers_done && pending.is_empty() => match batch {
                    Some(headers) => {
                        pending.extend(headers.chunks(block_batch).map(<[Header]>::to_vec));
                    }
                    None => headers_done = true,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (start, len, blocks) = match joined {
                        Ok(joined) => joined,
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(_) => return Err(SyncError::Cancelled),
                    };

                    queue.push(start, len, blocks?);
                    while let Some(blocks) = queue.pop_ready() {
                        self.import_blocks(blocks, pivot, &mut fast).await?;
                    }
                }
            }
        }

        let Some(pivot) = pivot else {
            return Ok(());
        };
        let pivot_header = fast.pivot.ok_or(ChainError::UnknownNumber(pivot))?;

        self.set_state(DownloaderState::ProcessingState);
        self.sync_state(pivot_header.state_root).await?;

        let mut writer = self.chain.writer().await;
        writer.commit_pivot(&pivot_header)?;
        writer.insert_blocks(fast.above_pivot).await?;

        Ok(())
    }

    fn spawn_chunk(
        &self,
        in_flight: &mut JoinSet<(u64, u64, Result<Vec<FetchedBlock>, SyncError>)>,
        headers: Vec<Header>,
        pivot: Option<u64>,
    ) {
        let start = headers.first().map_or(0, |header| header.number);
        let len = usize_to_u64(headers.len());

        let retriever = self.retriever.clone();
        let counters = Arc::clone(&self.counters);
        let cancel = self.cancel.clone();

        in_flight.spawn(
            async move {
                let blocks = fetch_chunk(&retriever, &counters, &cancel, headers, pivot).await;
                (start, len, blocks)
            }
            .in_current_span(),
        );
    }

    async fn import_blocks(
        &self,
        blocks: Vec<FetchedBlock>,
        pivot: Option<u64>,
        fast: &mut FastSyncProgress,
    ) -> Result<(), SyncError> {
        let Some(pivot) = pivot else {
            let blocks = blocks.into_iter().map(|(block, _)| block).collect();
            self.chain.writer().await.insert_blocks(blocks).await?;
            self.made_progress();
            return Ok(());
        };

        let mut stored = Vec::with_capacity(blocks.len());
        for (block, receipts) in blocks {
            if block.number() > pivot {
                fast.above_pivot.push(block);
                continue;
            }
            if block.number() == pivot {
                fast.pivot = Some(block.header.clone());
            }
            stored.push((block, receipts.unwrap_or_default()));
        }

        if !stored.is_empty() {
            self.chain.writer().await.insert_receipt_chain(stored)?;
        }
        self.made_progress();
        Ok(())
    }
}

/// Fetches the bodies and, at or below `pivot`, the receipts of `headers`.
///
/// Both are requested at once, empty bodies and receipts are not requested.
async fn fetch_chunk(
    retriever: &RetrieveManager,
    counters: &Arc<Counters>,
    cancel: &CancellationToken,
    headers: Vec<Header>,
    pivot: Option<u64>,
) -> Result<Vec<FetchedBlock>, SyncError> {
    let last = headers.last().map_or(0, |header| header.number);
    let needs_receipts = |header: &Header| pivot.is_some_and(|pivot| header.number <= pivot);

    let body_roots = headers
        .iter()
        .filter(|header| !header.has_empty_body())
        .map(|header| (header.hash(), header.tx_root))
        .collect::<Vec<_>>();
    let receipt_roots = headers
        .iter()
        .filter(|header| needs_receipts(header) && !header.has_empty_receipts())
        .map(|header| (header.hash(), header.receipts_root))
        .collect::<Vec<_>>();

    let bodies = async {
        if body_roots.is_empty() {
            return Ok(Vec::new());
        }
        let response = retrieve(
            retriever,
            counters,
            bodies_request(counters, &body_roots, last),
            cancel,
        )
        .await?;
        match response {
            ProtocolResponse::BlockBodies(bodies) => Ok(bodies),
            ProtocolResponse::BlockHeaders(_)
            | ProtocolResponse::Receipts(_)
            | ProtocolResponse::NodeData(_)
            | ProtocolResponse::Proofs(_)
            | ProtocolResponse::HelperTrieProofs(_) => Err(SyncError::WrongResponse),
        }
    };

    let receipts = async {
        if receipt_roots.is_empty() {
            return Ok(Vec::new());
        }
        let response = retrieve(
            retriever,
            counters,
            receipts_request(counters, &receipt_roots, last),
            cancel,
        )
        .await?;
        match response {
            ProtocolResponse::Receipts(receipts) => Ok(receipts),
            ProtocolResponse::BlockHeaders(_)
            | ProtocolResponse::BlockBodies(_)
            | ProtocolResponse::NodeData(_)
            | ProtocolResponse::Proofs(_)
            | ProtocolResponse::HelperTrieProofs(_) => Err(SyncError::WrongResponse),
        }
    };

    let (bodies, receipts) = tokio::try_join!(bodies, receipts)?;
    Counters::add(&counters.bodies_in, bodies.len());
    Counters::add(&counters.receipts_in, receipts.len());

    let mut bodies = bodies.into_iter();
    let mut receipts = receipts.into_iter();

    headers
        .into_iter()
        .map(|header| {
            let body = if header.has_empty_body() {
                BlockBody::default()
            } else {
                bodies.next().ok_or(SyncError::WrongResponse)?
            };

            let block_receipts = if !needs_receipts(&header) {
                None
            } else if header.has_empty_receipts() {
                Some(Vec::new())
            } else {
                Some(receipts.next().ok_or(SyncError::WrongResponse)?)
            };

            Ok((Block { header, body }, block_receipts))
        })
        .collect()
}

/// A request for the bodies of the blocks in `roots`, each checked against its transactions root.
fn bodies_request(counters: &Arc<Counters>, roots: &[(Hash, Hash)], last: u64) -> RetrieveRequest {
    let (hashes, tx_roots): (Vec<_>, Vec<_>) = roots.iter().copied().unzip();

    RetrieveRequest::new(
        ProtocolRequest::GetBlockBodies(hashes),
        RequestCriteria::full_server().with_min_number(last),
        counting_validator(counters, move |response| {
            let ProtocolResponse::BlockBodies(bodies) = response else {
                return Err(InvalidResponse("expected bodies"));
            };
            if bodies.len() != tx_roots.len() {
                return Err(InvalidResponse("wrong amount of bodies"));
            }
            if bodies
                .iter()
                .zip(&tx_roots)
                .any(|(body, root)| body.tx_root() != *root)
            {
                return Err(InvalidResponse("body does not match its header"));
            }
            Ok(())
        }),
    )
}

/// A request for the receipts of the blocks in `roots`, each checked against its receipts root.
fn receipts_request(counters: &Arc<Counters>, roots: &[(Hash, Hash)], last: u64) -> RetrieveRequest {
    let (hashes, receipts_roots): (Vec<_>, Vec<_>) = roots.iter().copied().unzip();

    RetrieveRequest::new(
        ProtocolRequest::GetReceipts(hashes),
        RequestCriteria::full_server().with_min_number(last),
        counting_validator(counters, move |response| {
            let ProtocolResponse::Receipts(receipts) = response else {
                return Err(InvalidResponse("expected receipts"));
            };
            if receipts.len() != receipts_roots.len() {
                return Err(InvalidResponse("wrong amount of receipts"));
            }
            if receipts
                .iter()
                .zip(&receipts_roots)
                .any(|(receipts, root)| Receipt::root(receipts) != *root)
            {
                return Err(InvalidResponse("receipts do not match their header"));
            }
            Ok(())
        }),
    )
}
