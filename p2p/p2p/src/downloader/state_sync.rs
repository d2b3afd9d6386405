use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use tokio::task::JoinSet;
use tracing::Instrument;

use cinder_blockchain::ChainError;
use cinder_types::{
    trie::{node_hash, TrieNode},
    Hash,
};
use cinder_wire::{ProtocolRequest, ProtocolResponse};

use crate::{
    distributor::RequestCriteria,
    retrieve::{InvalidResponse, RetrieveRequest},
};

use super::{counting_validator, retrieve, Counters, SyncAttempt, SyncError};

/// A downloaded node with children that are not stored yet.
struct PendingNode {
    encoded: Vec<u8>,
    missing: usize,
}

/// Tracks the download of one state trie.
///
/// Nodes are only handed out for writing once every node below them is stored, so a stored
/// node always has its whole subtree stored.
pub(super) struct StateSync {
    /// Every hash that was queued, a node referenced from several places is only fetched once.
    requested: HashSet<Hash>,
    queue: VecDeque<Hash>,
    pending: HashMap<Hash, PendingNode>,
    /// The pending nodes waiting on each child.
    parents: HashMap<Hash, Vec<Hash>>,
}

impl StateSync {
    pub(super) fn new(root: Hash) -> Self {
        Self {
            requested: HashSet::from([root]),
            queue: VecDeque::from([root]),
            pending: HashMap::new(),
            parents: HashMap::new(),
        }
    }

    /// The next hashes to fetch, at most `max`.
    pub(super) fn next_batch(&mut self, max: usize) -> Vec<Hash> {
        let len = self.queue.len().min(max);
        self.queue.drain(..len).collect()
    }

    /// Returns `true` once every node was fetched and handed out.
    pub(super) fn is_done(&self) -> bool {
        self.queue.is_empty() && self.pending.is_empty()
    }

    /// Adds a fetched node, returning the nodes that can now be written, children first.
    ///
    /// The returned nodes must be written before the next call, `is_stored` is asked about
    /// the children of later nodes.
    pub(super) fn process(
        &mut self,
        hash: Hash,
        encoded: Vec<u8>,
        mut is_stored: impl FnMut(&Hash) -> Result<bool, ChainError>,
    ) -> Result<Vec<Vec<u8>>, SyncError> {
        let node = TrieNode::decode(&encoded).map_err(|_| SyncError::WrongResponse)?;

        let mut missing = 0;
        for child in node.child_hashes() {
            if is_stored(&child)? {
                continue;
            }

            missing += 1;
            self.parents.entry(child).or_default().push(hash);
            if self.requested.insert(child) {
                self.queue.push_back(child);
            }
        }

        if missing > 0 {
            self.pending.insert(hash, PendingNode { encoded, missing });
            return Ok(Vec::new());
        }

        let mut complete = Vec::new();
        let mut ready = vec![(hash, encoded)];

        while let Some((hash, encoded)) = ready.pop() {
            complete.push(encoded);

            for parent in self.parents.remove(&hash).unwrap_or_default() {
                let Some(pending) = self.pending.get_mut(&parent) else {
                    continue;
                };

                pending.missing -= 1;
                if pending.missing == 0 {
                    if let Some(pending) = self.pending.remove(&parent) {
                        ready.push((parent, pending.encoded));
                    }
                }
            }
        }

        Ok(complete)
    }
}

impl SyncAttempt {
    /// Downloads the state trie with `root`, writing it bottom up.
    pub(super) async fn sync_state(&self, root: Hash) -> Result<(), SyncError> {
        if self.chain.has_state(&root)? {
            return Ok(());
        }
        tracing::info!(root = hex::encode(&root[..8]), "downloading state");

        let mut sync = StateSync::new(root);
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.config.max_outstanding.max(1) {
                let hashes = sync.next_batch(self.config.node_batch.max(1));
                if hashes.is_empty() {
                    break;
                }

                let request = node_request(&self.counters, hashes.clone());
                let retriever = self.retriever.clone();
                let counters = Arc::clone(&self.counters);
                let cancel = self.cancel.clone();

                in_flight.spawn(
                    async move {
                        let response = retrieve(&retriever, &counters, request, &cancel).await;
                        (hashes, response)
                    }
                    .in_current_span(),
                );
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (hashes, response) = match joined {
                Ok(joined) => joined,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(SyncError::Cancelled),
            };

            let nodes = match response? {
                ProtocolResponse::NodeData(nodes) => nodes,
                ProtocolResponse::BlockHeaders(_)
                | ProtocolResponse::BlockBodies(_)
                | ProtocolResponse::Receipts(_)
                | ProtocolResponse::Proofs(_)
                | ProtocolResponse::HelperTrieProofs(_) => return Err(SyncError::WrongResponse),
            };
            Counters::add(&self.counters.states_in, nodes.len());

            for (hash, node) in hashes.into_iter().zip(nodes) {
                let complete = sync.process(hash, node, |child| self.chain.has_state(child))?;
                if !complete.is_empty() {
                    self.chain.write_state_nodes(complete)?;
                }
            }

            self.made_progress();
        }

        if !sync.is_done() || !self.chain.has_state(&root)? {
            return Err(SyncError::Stalled);
        }

        tracing::info!("state download finished");
        Ok(())
    }
}

/// A request for the trie nodes with `hashes`, each checked against its hash.
fn node_request(counters: &Arc<Counters>, hashes: Vec<Hash>) -> RetrieveRequest {
    RetrieveRequest::new(
        ProtocolRequest::GetNodeData(hashes.clone()),
        RequestCriteria::full_server(),
        counting_validator(counters, move |response| {
            let ProtocolResponse::NodeData(nodes) = response else {
                return Err(InvalidResponse("expected node data"));
            };
            if nodes.len() != hashes.len() {
                return Err(InvalidResponse("wrong amount of nodes"));
            }

            for (node, hash) in nodes.iter().zip(&hashes) {
                if node_hash(node) != *hash {
                    return Err(InvalidResponse("node does not match its hash"));
                }
                if TrieNode::decode(node).is_err() {
                    return Err(InvalidResponse("node does not decode"));
                }
            }
            Ok(())
        }),
    )
}
