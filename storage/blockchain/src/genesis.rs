use std::collections::BTreeMap;

use cinder_types::{
    commitment::EMPTY_ROOT,
    trie::{build_trie, TrieBuild},
    Block, BlockBody, Bloom, Header,
};

/// The first block of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Genesis {
    pub timestamp: u64,
    pub difficulty: u64,
    pub extra: Vec<u8>,
    /// The initial state.
    pub alloc: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Genesis {
    /// Builds the genesis block and the trie holding its state.
    pub fn to_block(&self) -> (Block, TrieBuild) {
        let state = build_trie(&self.alloc);

        let header = Header {
            parent_hash: [0; 32],
            number: 0,
            timestamp: self.timestamp,
            difficulty: self.difficulty.max(1),
            coinbase: [0; 20],
            state_root: state.root,
            tx_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            bloom: Bloom::default(),
            extra: self.extra.clone(),
            seal: vec![],
        };

        (
            Block {
                header,
                body: BlockBody::default(),
            },
            state,
        )
    }
}
