use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinSet};
use tracing::Instrument;

use cinder_blockchain::ChainError;
use cinder_helper::cast::usize_to_u64;
use cinder_p2p_core::PeerId;
use cinder_types::{HashOrNumber, Header, SyncMode};
use cinder_wire::{ProtocolRequest, ProtocolResponse};

use crate::{
    distributor::RequestCriteria,
    retrieve::{InvalidResponse, RetrieveRequest},
};

use super::{
    block_queue::BlockQueue, counting_validator, retrieve, Counters, DownloaderState,
    SyncAttempt, SyncError,
};

impl SyncAttempt {
    /// Fetches `amount` headers from `start` from the sync peer.
    pub(super) async fn fetch_header_range(
        &self,
        start: u64,
        amount: u64,
    ) -> Result<Vec<Header>, SyncError> {
        let response = self
            .retrieve(headers_request(&self.counters, self.target.peer, start, amount))
            .await?;
        into_headers(response)
    }

    /// Fetches the headers from `ancestor` to the target head and inserts them into the chain.
    ///
    /// Up to [`DownloaderConfig::max_outstanding`](crate::config::DownloaderConfig::max_outstanding)
    /// batches are requested at once, they are applied strictly in height order. Every applied
    /// batch is sent down `batch_tx`, if given.
    pub(super) async fn fetch_headers(
        &self,
        ancestor: &Header,
        batch_tx: Option<mpsc::Sender<Vec<Header>>>,
    ) -> Result<(), SyncError> {
        let end = self.target.head.number;
        let mut next_request = ancestor.number + 1;
        let mut queue = BlockQueue::new(ancestor.number + 1);
        let mut in_flight = JoinSet::new();
        let mut last = ancestor.clone();

        loop {
            while in_flight.len() < self.config.max_outstanding.max(1) && next_request <= end {
                let start = next_request;
                let amount = self.config.header_batch.max(1).min(end - start + 1);
                next_request += amount;

                let request = headers_request(&self.counters, self.target.peer, start, amount);
                let retriever = self.retriever.clone();
                let counters = Arc::clone(&self.counters);
                let cancel = self.cancel.clone();

                in_flight.spawn(
                    async move {
                        let response = retrieve(&retriever, &counters, request, &cancel).await;
                        (start, amount, response)
                    }
                    .in_current_span(),
                );
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (start, amount, response) = match joined {
                Ok(joined) => joined,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(SyncError::Cancelled),
            };

            queue.push(start, amount, into_headers(response?)?);
            while let Some(batch) = queue.pop_ready() {
                self.apply_header_batch(&mut last, batch, batch_tx.as_ref())
                    .await?;
            }
        }

        if self.config.mode != SyncMode::Light {
            self.set_state(DownloaderState::FetchingBodiesAndReceipts);
        }
        Ok(())
    }

    async fn apply_header_batch(
        &self,
        last: &mut Header,
        batch: Vec<Header>,
        batch_tx: Option<&mpsc::Sender<Vec<Header>>>,
    ) -> Result<(), SyncError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };

        if first.parent_hash != last.hash() || first.number != last.number + 1 {
            tracing::warn!(
                peer = self.target.peer.0,
                number = first.number,
                "header batch does not link to the previous one"
            );
            self.penalise_target();
            return Err(SyncError::HeaderChainBroken {
                number: first.number,
            });
        }

        let res = self
            .chain
            .writer()
            .await
            .insert_headers(batch.clone())
            .await;

        if let Err(ChainError::Consensus { number, error }) = &res {
            tracing::warn!(peer = self.target.peer.0, number, "peer sent an invalid header: {error}");
            self.penalise_target();
        }
        res?;

        Counters::add(&self.counters.headers_in, batch.len());
        self.made_progress();

        if let Some(batch_last) = batch.last() {
            *last = batch_last.clone();
        }

        if let Some(batch_tx) = batch_tx {
            batch_tx
                .send(batch)
                .await
                .map_err(|_| SyncError::Cancelled)?;
        }

        Ok(())
    }
}

/// A request for `amount` linked headers from `start`, from `peer` only.
fn headers_request(counters: &Arc<Counters>, peer: PeerId, start: u64, amount: u64) -> RetrieveRequest {
    RetrieveRequest::new(
        ProtocolRequest::GetBlockHeaders {
            origin: HashOrNumber::Number(start),
            amount,
            skip: 0,
            reverse: false,
        },
        RequestCriteria::peer(peer),
        counting_validator(counters, move |response| {
            let ProtocolResponse::BlockHeaders(headers) = response else {
                return Err(InvalidResponse("expected headers"));
            };

            if usize_to_u64(headers.len()) != amount {
                return Err(InvalidResponse("wrong amount of headers"));
            }
            if headers.first().is_some_and(|first| first.number != start) {
                return Err(InvalidResponse("headers start at the wrong height"));
            }

            check_linked(headers)
        }),
    )
}

/// Checks every header is the child of the one before it.
pub(super) fn check_linked(headers: &[Header]) -> Result<(), InvalidResponse> {
    for (parent, child) in headers.iter().zip(headers.iter().skip(1)) {
        if child.parent_hash != parent.hash() || child.number != parent.number + 1 {
            return Err(InvalidResponse("headers do not link"));
        }
    }

    Ok(())
}

fn into_headers(response: ProtocolResponse) -> Result<Vec<Header>, SyncError> {
    match response {
        ProtocolResponse::BlockHeaders(headers) => Ok(headers),
        ProtocolResponse::BlockBodies(_)
        | ProtocolResponse::Receipts(_)
        | ProtocolResponse::NodeData(_)
        | ProtocolResponse::Proofs(_)
        | ProtocolResponse::HelperTrieProofs(_) => Err(SyncError::WrongResponse),
    }
}

#[cfg(test)]
mod tests {
    use cinder_test_utils::chain::{test_genesis, ChainBuilder};

    use super::*;

    #[test]
    fn linked_headers_pass() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(10);

        assert!(check_linked(&builder.headers(0, 10)).is_ok());
        assert!(check_linked(&[]).is_ok());
    }

    #[test]
    fn gaps_and_forks_are_rejected() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(10);

        let mut gap = builder.headers(1, 10);
        gap.remove(4);
        assert!(check_linked(&gap).is_err());

        let mut fork = builder.fork(5, 1);
        fork.extend(5);
        let mut mixed = builder.headers(1, 7);
        mixed.extend(fork.headers(8, 10));
        assert!(check_linked(&mixed).is_err());
    }
}
