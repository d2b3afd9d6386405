//! The state executor capability; `trait StateExecutor`.
//!
//! The chain does not know what transactions mean, it hands each block to a
//! [`StateExecutor`] together with read access to the parent's state trie and
//! stores whatever trie nodes the executor produced.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use cinder_types::{
    borsh_hash,
    trie::{self, TrieError},
    Address, Block, Hash, Log, Receipt,
};

//---------------------------------------------------------------------------------------------------- Types
/// An error executing a block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("state trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("{0}")]
    Other(String),
}

/// Read access to stored state trie nodes.
pub trait StateDb {
    /// Returns the encoded trie node with hash `hash`.
    fn node(&self, hash: &Hash) -> Option<Vec<u8>>;
}

impl StateDb for BTreeMap<Hash, Vec<u8>> {
    fn node(&self, hash: &Hash) -> Option<Vec<u8>> {
        self.get(hash).cloned()
    }
}

/// The outcome of executing a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// One receipt per transaction.
    pub receipts: Vec<Receipt>,
    /// The state root after the block.
    pub state_root: Hash,
    /// The trie nodes created by the block, keyed by hash.
    pub nodes: BTreeMap<Hash, Vec<u8>>,
}

/// Applies blocks to state.
pub trait StateExecutor: Send + Sync + 'static {
    /// Executes every transaction in `block` on top of the state with root `parent_state_root`.
    fn apply(
        &self,
        block: &Block,
        parent_state_root: Hash,
        state: &dyn StateDb,
    ) -> Result<Execution, ExecutionError>;
}

//---------------------------------------------------------------------------------------------------- KvExecutor
/// A transaction understood by [`KvExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum KvOp {
    /// Set `key` to `value`, emitting a log with `topic` if one is given.
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        topic: Option<Hash>,
    },
}

impl KvOp {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("serializing to a vec can not fail")
    }
}

/// A [`StateExecutor`] where state is a plain key-value map.
///
/// Transactions are [`borsh`] encoded [`KvOp`]s, anything else fails with an
/// unsuccessful receipt and leaves the state untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvExecutor;

impl KvExecutor {
    /// The address logs emitted for `key` carry.
    pub fn log_address(key: &[u8]) -> Address {
        let hash = borsh_hash(key);
        let mut out = [0; 20];
        out.copy_from_slice(&hash[..20]);
        out
    }
}

impl StateExecutor for KvExecutor {
    fn apply(
        &self,
        block: &Block,
        parent_state_root: Hash,
        state: &dyn StateDb,
    ) -> Result<Execution, ExecutionError> {
        let mut root = parent_state_root;
        let mut nodes = BTreeMap::new();
        let mut receipts = Vec::with_capacity(block.body.transactions.len());

        for tx in &block.body.transactions {
            let Ok(KvOp::Set { key, value, topic }) = KvOp::try_from_slice(&tx.0) else {
                receipts.push(Receipt {
                    success: false,
                    logs: vec![],
                });
                continue;
            };

            let build = trie::insert(root, &key, value.clone(), |hash| {
                nodes.get(hash).cloned().or_else(|| state.node(hash))
            })?;

            root = build.root;
            nodes.extend(build.nodes);

            let logs = topic
                .map(|topic| Log {
                    address: Self::log_address(&key),
                    topics: vec![topic],
                    data: value,
                })
                .into_iter()
                .collect();

            receipts.push(Receipt {
                success: true,
                logs,
            });
        }

        Ok(Execution {
            receipts,
            state_root: root,
            nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use cinder_types::{commitment::EMPTY_ROOT, BlockBody, Bloom, Header, Transaction};

    use super::*;

    fn block(txs: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                parent_hash: [0; 32],
                number: 1,
                timestamp: 1,
                difficulty: 1,
                coinbase: [0; 20],
                state_root: EMPTY_ROOT,
                tx_root: EMPTY_ROOT,
                receipts_root: EMPTY_ROOT,
                bloom: Bloom::default(),
                extra: vec![],
                seal: vec![],
            },
            body: BlockBody { transactions: txs },
        }
    }

    #[test]
    fn sets_state_and_logs() {
        let set = KvOp::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            topic: Some([9; 32]),
        };
        let block = block(vec![Transaction(set.encode()), Transaction(vec![0xff])]);

        let exec = KvExecutor
            .apply(&block, EMPTY_ROOT, &BTreeMap::new())
            .unwrap();

        assert_eq!(exec.receipts.len(), 2);
        assert!(exec.receipts[0].success);
        assert!(!exec.receipts[1].success);
        assert_eq!(exec.receipts[0].logs[0].topics, vec![[9; 32]]);
        assert_eq!(
            trie::get(exec.state_root, b"k", |h| exec.nodes.get(h).cloned()).unwrap(),
            Some(b"v".to_vec())
        );
    }
}
