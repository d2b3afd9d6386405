//! Deterministic chain generation.
//!
//! A [`ChainBuilder`] produces blocks on top of a [`Genesis`], executing each one
//! with the [`KvExecutor`] so headers carry correct state roots, receipts roots
//! and blooms. Every fifth block is empty.

use std::{collections::BTreeMap, sync::Arc};

use cinder_blockchain::{BlockChain, Genesis, KvExecutor, KvOp, StateExecutor};
use cinder_consensus::ConsensusEngine;
use cinder_database::MemoryStore;
use cinder_types::{Block, BlockBody, Hash, Header, Receipt, SyncMode, Transaction};

/// The genesis every generated chain starts from unless told otherwise.
pub fn test_genesis() -> Genesis {
    Genesis {
        timestamp: 0,
        difficulty: 1,
        extra: b"cinder test".to_vec(),
        alloc: (0_u8..8)
            .map(|i| (format!("alloc-{i}").into_bytes(), vec![i; 4]))
            .collect(),
    }
}

/// Opens an empty in-memory chain with `genesis`, using the [`ConsensusEngine::Faker`].
pub fn open_chain(genesis: &Genesis, mode: SyncMode) -> Arc<BlockChain> {
    Arc::new(
        BlockChain::open(
            Arc::new(MemoryStore::new()),
            genesis,
            Arc::new(ConsensusEngine::Faker),
            Arc::new(KvExecutor),
            mode,
        )
        .expect("a fresh store always opens"),
    )
}

/// The log topic blocks at `number` emit.
pub fn log_topic(number: u64) -> Hash {
    let mut topic = [0; 32];
    topic[..8].copy_from_slice(&number.to_be_bytes());
    topic
}

/// Generates blocks, see the [module docs](self).
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    genesis: Genesis,
    genesis_header: Header,
    /// `blocks[i]` is the block at height `i + 1`.
    blocks: Vec<(Block, Vec<Receipt>)>,
    /// Every state trie node created so far, on any branch.
    nodes: BTreeMap<Hash, Vec<u8>>,
    salt: u8,
    difficulty: u64,
    txs_per_block: u64,
}

impl ChainBuilder {
    pub fn new(genesis: Genesis) -> Self {
        let (block, state) = genesis.to_block();

        Self {
            genesis,
            genesis_header: block.header,
            blocks: Vec::new(),
            nodes: state.nodes,
            salt: 0,
            difficulty: 1,
            txs_per_block: 3,
        }
    }

    /// Sets the difficulty of the blocks generated from now on.
    #[must_use]
    pub const fn difficulty(mut self, difficulty: u64) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Sets the amount of transactions in each non-empty block.
    #[must_use]
    pub const fn txs_per_block(mut self, txs: u64) -> Self {
        self.txs_per_block = txs;
        self
    }

    pub const fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub const fn genesis_header(&self) -> &Header {
        &self.genesis_header
    }

    pub fn height(&self) -> u64 {
        u64::try_from(self.blocks.len()).expect("test chains fit in a u64")
    }

    pub fn head(&self) -> Header {
        self.blocks
            .last()
            .map_or_else(|| self.genesis_header.clone(), |(block, _)| block.header.clone())
    }

    /// The total weight of the chain up to `number`.
    pub fn weight(&self, number: u64) -> u128 {
        std::iter::once(&self.genesis_header)
            .chain(self.blocks.iter().map(|(block, _)| &block.header))
            .take_while(|header| header.number <= number)
            .map(|header| u128::from(header.difficulty))
            .sum()
    }

    /// Appends `count` blocks.
    pub fn extend(&mut self, count: u64) -> &mut Self {
        for _ in 0..count {
            let parent = self.head();
            let (block, receipts) = self.next_block(&parent);
            self.blocks.push((block, receipts));
        }
        self
    }

    /// A builder sharing this chain up to and including height `at`, whose future blocks
    /// differ from this chain's.
    pub fn fork(&self, at: u64, salt: u8) -> Self {
        let mut fork = self.clone();
        fork.blocks
            .truncate(usize::try_from(at).expect("test chains fit in a usize"));
        fork.salt = salt;
        fork
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.blocks.get(index).map(|(block, _)| block)
    }

    pub fn receipts(&self, number: u64) -> Option<&[Receipt]> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.blocks.get(index).map(|(_, receipts)| receipts.as_slice())
    }

    pub fn header(&self, number: u64) -> Option<&Header> {
        if number == 0 {
            return Some(&self.genesis_header);
        }
        self.block(number).map(|block| &block.header)
    }

    /// Every generated block, lowest first.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.iter().map(|(block, _)| block.clone()).collect()
    }

    /// The headers from `start` to `end` inclusive.
    pub fn headers(&self, start: u64, end: u64) -> Vec<Header> {
        (start..=end)
            .map_while(|number| self.header(number).cloned())
            .collect()
    }

    /// Every state trie node created by this chain, and by the chains it was forked from.
    pub const fn state_nodes(&self) -> &BTreeMap<Hash, Vec<u8>> {
        &self.nodes
    }

    /// Opens an empty in-memory chain with this builder's genesis.
    pub fn open_chain(&self, mode: SyncMode) -> Arc<BlockChain> {
        open_chain(&self.genesis, mode)
    }

    /// Writes the blocks up to `height` into `chain`.
    ///
    /// Light chains only get the headers.
    pub async fn import_into(&self, chain: &BlockChain, height: u64) {
        let mut writer = chain.writer().await;
        match chain.mode() {
            SyncMode::Light => {
                writer
                    .insert_headers(self.headers(1, height))
                    .await
                    .expect("generated headers are valid");
            }
            SyncMode::Full | SyncMode::Fast => {
                let blocks = self
                    .blocks
                    .iter()
                    .take_while(|(block, _)| block.number() <= height)
                    .map(|(block, _)| block.clone())
                    .collect();
                writer
                    .insert_blocks(blocks)
                    .await
                    .expect("generated blocks are valid");
            }
        }
    }

    /// A full in-memory chain holding every generated block.
    pub async fn build(&self) -> Arc<BlockChain> {
        let chain = self.open_chain(SyncMode::Full);
        self.import_into(&chain, self.height()).await;
        chain
    }

    fn next_block(&mut self, parent: &Header) -> (Block, Vec<Receipt>) {
        let number = parent.number + 1;

        let transactions = if number % 5 == 0 {
            vec![]
        } else {
            (0..self.txs_per_block)
                .map(|i| {
                    let op = KvOp::Set {
                        key: format!("key-{}", (number * 7 + i) % 32).into_bytes(),
                        value: vec![self.salt, number.to_le_bytes()[0], i.to_le_bytes()[0]],
                        topic: (i == 0).then(|| log_topic(number)),
                    };
                    Transaction(op.encode())
                })
                .collect()
        };

        let mut block = Block {
            header: Header {
                parent_hash: parent.hash(),
                number,
                timestamp: parent.timestamp + 1,
                difficulty: self.difficulty,
                coinbase: [self.salt; 20],
                extra: vec![self.salt],
                ..Default::default()
            },
            body: BlockBody { transactions },
        };

        let execution = KvExecutor
            .apply(&block, parent.state_root, &self.nodes)
            .expect("generated transactions always apply");

        block.header.state_root = execution.state_root;
        block.header.tx_root = block.body.tx_root();
        block.header.receipts_root = Receipt::root(&execution.receipts);
        block.header.bloom = Receipt::combined_bloom(&execution.receipts);

        self.nodes.extend(execution.nodes);

        (block, execution.receipts)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn generated_chain_imports() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(12);

        let chain = builder.build().await;
        assert_eq!(chain.head_info().unwrap().number, 12);
        assert_eq!(chain.head_block().unwrap(), builder.head());
        assert!(builder.block(5).unwrap().header.has_empty_body());
    }

    #[test]
    fn forks_share_a_prefix() {
        let mut main = ChainBuilder::new(test_genesis());
        main.extend(10);

        let mut fork = main.fork(6, 1);
        fork.extend(6);

        assert_eq!(fork.header(6), main.header(6));
        assert_ne!(fork.header(7), main.header(7));
        assert_eq!(fork.height(), 12);
        assert_eq!(fork.weight(12), 13);
    }
}
