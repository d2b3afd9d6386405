//! The canonical hash trie backend.
//!
//! One trie covers every height from genesis, each section adds its heights to the trie
//! of the section before it. The root after section `n` is stored under
//! [`cht_root_key(n)`](cinder_blockchain::tables::cht_root_key), with the block it ends
//! at, and its nodes under
//! [`cht_node_key`](cinder_blockchain::tables::cht_node_key), where
//! [`serve_request`](cinder_blockchain::serve_request) finds them to prove headers.
use std::collections::{BTreeMap, HashSet};

use borsh::{BorshDeserialize, BorshSerialize};

use cinder_blockchain::{
    tables::{cht_entry_key, cht_node_key, cht_root_key},
    BlockChain, ChtRoot,
};
use cinder_database::WriteBatch;
use cinder_types::{
    commitment::EMPTY_ROOT,
    trie::{self, TrieNode},
    Hash, Header,
};

use crate::{IndexerBackend, IndexerError};

/// The value stored for a height in the CHT.
#[derive(Debug, Copy, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChtEntry {
    /// The canonical hash at the height.
    pub hash: Hash,
    /// The chain's weight up to and including the block.
    pub weight: u128,
}

impl ChtEntry {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("serializing to a vec can not fail")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Self::try_from_slice(bytes).ok()
    }
}

/// Builds the canonical hash trie.
#[derive(Debug)]
pub struct ChtIndexer {
    root: Hash,
    /// The last header added to the trie.
    head: Option<(u64, Hash)>,
    /// Nodes created in this section, not yet stored.
    pending: BTreeMap<Hash, Vec<u8>>,
}

impl Default for ChtIndexer {
    fn default() -> Self {
        Self {
            root: EMPTY_ROOT,
            head: None,
            pending: BTreeMap::new(),
        }
    }
}

impl ChtIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending nodes still reachable from the root, replaced nodes are not stored.
    fn reachable_pending(&self) -> HashSet<Hash> {
        let mut reachable = HashSet::new();
        let mut stack = vec![self.root];

        while let Some(hash) = stack.pop() {
            let Some(encoded) = self.pending.get(&hash) else {
                continue;
            };
            if !reachable.insert(hash) {
                continue;
            }
            if let Ok(node) = TrieNode::decode(encoded) {
                stack.extend(node.child_hashes());
            }
        }

        reachable
    }
}

impl IndexerBackend for ChtIndexer {
    const NAME: &'static str = "cht";

    fn reset(&mut self, chain: &BlockChain, section: u64) -> Result<(), IndexerError> {
        self.pending.clear();
        self.head = None;
        self.root = match section.checked_sub(1) {
            Some(previous) => chain
                .cht_root(previous)?
                .ok_or(IndexerError::MissingSection { section: previous })?,
            None => EMPTY_ROOT,
        };
        Ok(())
    }

    fn process(
        &mut self,
        chain: &BlockChain,
        header: &Header,
        weight: u128,
    ) -> Result<(), IndexerError> {
        let entry = ChtEntry {
            hash: header.hash(),
            weight,
        };

        let pending = &self.pending;
        let build = trie::insert(
            self.root,
            &cht_entry_key(header.number),
            entry.encode(),
            |hash| match pending.get(hash) {
                Some(node) => Some(node.clone()),
                None => chain.cht_node(hash).ok().flatten(),
            },
        )?;

        self.root = build.root;
        self.head = Some((header.number, entry.hash));
        self.pending.extend(build.nodes);
        Ok(())
    }

    fn commit(&mut self, section: u64, batch: &mut WriteBatch) -> Result<(), IndexerError> {
        let reachable = self.reachable_pending();
        for (hash, node) in std::mem::take(&mut self.pending) {
            if reachable.contains(&hash) {
                batch.put(cht_node_key(&hash), node);
            }
        }

        let record = ChtRoot {
            root: self.root,
            head: self.head,
        };
        batch.put_borsh(cht_root_key(section), &record);
        Ok(())
    }

    fn prune(&self, section: u64, batch: &mut WriteBatch) {
        // Nodes may be shared with earlier sections, only the root goes.
        batch.delete(cht_root_key(section));
    }
}
