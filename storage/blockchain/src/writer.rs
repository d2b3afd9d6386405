//! The single writer of the chain heads.

//---------------------------------------------------------------------------------------------------- Import
use std::sync::Arc;

use tokio::sync::MutexGuard;
use tracing::instrument;

use cinder_consensus::validate_header_chain;
use cinder_database::{StoreExt, WriteBatch};
use cinder_helper::{asynch::rayon_spawn_async, cast::usize_to_u64};
use cinder_types::{Block, ChainEvent, Header, Receipt, SyncMode};

use crate::{
    chain::ChainResult,
    tables::{
        body_key, canonical_key, header_key, receipts_key, state_node_key, weight_key,
        META_HEAD_BLOCK, META_HEAD_HEADER,
    },
    BlockChain, ChainError,
};

//---------------------------------------------------------------------------------------------------- ChainWriter
/// Exclusive write access to the chain.
///
/// Only one [`ChainWriter`] exists at a time, the sync pipeline and the block fetcher
/// both take it before appending to the chain.
pub struct ChainWriter<'a> {
    chain: &'a BlockChain,
    _guard: MutexGuard<'a, ()>,
}

impl BlockChain {
    /// Waits for, then takes, exclusive write access to the chain.
    pub async fn writer(&self) -> ChainWriter<'_> {
        ChainWriter {
            _guard: self.gate.lock().await,
            chain: self,
        }
    }
}

impl ChainWriter<'_> {
    pub const fn chain(&self) -> &BlockChain {
        self.chain
    }

    //------------------------------------------------ Headers
    /// Validates and stores a contiguous batch of headers.
    ///
    /// Headers that are already stored are skipped. If the batch ends on a chain heavier
    /// than the current header head it becomes canonical.
    ///
    /// Returns the amount of new headers stored.
    ///
    /// # Errors
    /// - [`ChainError::NotContiguous`] if the headers do not link to each other.
    /// - [`ChainError::UnknownParent`] if the first new header's parent is unknown.
    /// - [`ChainError::Consensus`] if a header is invalid.
    #[instrument(level = "debug", skip_all, fields(len = headers.len()))]
    pub async fn insert_headers(&mut self, headers: Vec<Header>) -> ChainResult<usize> {
        if headers
            .windows(2)
            .any(|w| w[1].parent_hash != w[0].hash() || w[1].number != w[0].number + 1)
        {
            return Err(ChainError::NotContiguous);
        }

        let mut known = 0;
        for header in &headers {
            if !self.chain.has_header(&header.hash())? {
                break;
            }
            known += 1;
        }

        let mut headers = headers;
        let headers = headers.split_off(known);
        let Some(first) = headers.first() else {
            return Ok(0);
        };

        let first_number = first.number;
        let parent = self.chain.parent(first)?;
        let parent_weight = self
            .chain
            .weight(&first.parent_hash)?
            .ok_or(ChainError::UnknownParent(first.parent_hash))?;

        let consensus = Arc::clone(&self.chain.consensus);
        let headers = rayon_spawn_async(move || {
            validate_header_chain(consensus.as_ref(), &parent, &headers).map(|()| headers)
        })
        .await
        .map_err(|(i, error)| ChainError::Consensus {
            number: first_number + usize_to_u64(i),
            error,
        })?;

        let mut batch = WriteBatch::new();
        let mut weight = parent_weight;
        for header in &headers {
            weight += u128::from(header.difficulty);
            let hash = header.hash();
            batch.put_borsh(header_key(&hash), header);
            batch.put_borsh(weight_key(&hash), &weight);
        }
        self.chain.store.write_batch(batch)?;

        let last = headers.last().expect("headers is not empty");
        let head = self.chain.head_header()?;
        let head_weight = self.chain.weight(&head.hash())?.unwrap_or_default();

        if weight > head_weight {
            self.set_canonical(last)?;
        } else if self.chain.mode() == SyncMode::Light {
            self.chain.emit(ChainEvent::ChainSide {
                header: Arc::new(last.clone()),
            });
        }

        Ok(headers.len())
    }

    /// Makes `new_head` the canonical header head, rewriting the canonical mapping back to
    /// the fork point and pulling the block head back if it left the canonical chain.
    fn set_canonical(&self, new_head: &Header) -> ChainResult<()> {
        let chain = self.chain;
        let old_head = chain.head_header()?;

        let mut batch = WriteBatch::new();
        for number in new_head.number + 1..=old_head.number {
            batch.delete(canonical_key(number));
        }

        let mut ancestor = new_head.clone();
        while !chain.is_canonical(&ancestor)? {
            batch.put_borsh(canonical_key(ancestor.number), &ancestor.hash());
            ancestor = chain.parent(&ancestor)?;
        }

        batch.put_borsh(META_HEAD_HEADER.to_vec(), &new_head.hash());

        let head_block = chain.head_block()?;
        let rewound = if head_block.number > ancestor.number {
            let mut block = ancestor.clone();
            while !chain.is_block_imported(&block)? {
                block = chain.parent(&block)?;
            }
            batch.put_borsh(META_HEAD_BLOCK.to_vec(), &block.hash());
            Some(block)
        } else {
            None
        };

        chain.store.write_batch(batch)?;

        if ancestor.number < old_head.number {
            tracing::info!(
                from = old_head.number,
                to = new_head.number,
                ancestor = ancestor.number,
                "header chain reorganized"
            );
        }

        if chain.mode() == SyncMode::Light {
            chain.emit(ChainEvent::ChainHead {
                header: Arc::new(new_head.clone()),
            });
        } else if let Some(block) = rewound {
            chain.emit(ChainEvent::ChainHead {
                header: Arc::new(block),
            });
        }

        self.advance_head_block()
    }

    /// Moves the block head forward over every following canonical block that is imported.
    fn advance_head_block(&self) -> ChainResult<()> {
        let chain = self.chain;
        if chain.mode() == SyncMode::Light {
            return Ok(());
        }

        let mut head = chain.head_block()?;
        let mut advanced = Vec::new();

        while let Some(next) = chain.header_by_number(head.number + 1)? {
            if !chain.is_block_imported(&next)? {
                break;
            }
            advanced.push(next.clone());
            head = next;
        }

        if advanced.is_empty() {
            return Ok(());
        }

        chain
            .store
            .put_borsh(META_HEAD_BLOCK.to_vec(), &head.hash())?;

        for header in &advanced {
            let hash = header.hash();
            let logs = chain
                .receipts(&hash)?
                .unwrap_or_default()
                .into_iter()
                .flat_map(|r| r.logs)
                .collect::<Vec<_>>();

            if !logs.is_empty() {
                chain.emit(ChainEvent::Logs {
                    block_hash: hash,
                    number: header.number,
                    logs: logs.into(),
                });
            }
        }

        tracing::debug!(number = head.number, "block head advanced");
        chain.emit(ChainEvent::ChainHead {
            header: Arc::new(head),
        });

        Ok(())
    }

    //------------------------------------------------ Blocks
    /// Executes and stores full blocks.
    ///
    /// Unknown headers are validated and inserted first. Each block's parent must already
    /// be imported.
    ///
    /// # Errors
    /// Besides the [`ChainWriter::insert_headers`] errors:
    /// - [`ChainError::BodyMismatch`] if a body does not match its header.
    /// - [`ChainError::MissingState`] if a parent's state is not stored.
    /// - [`ChainError::ReceiptsMismatch`]/[`ChainError::StateRootMismatch`] if execution
    ///   disagrees with the header.
    #[instrument(level = "debug", skip_all, fields(len = blocks.len()))]
    pub async fn insert_blocks(&mut self, blocks: Vec<Block>) -> ChainResult<usize> {
        let mut imported = 0;

        for block in blocks {
            let hash = block.hash();
            let number = block.number();

            if self.chain.is_block_imported(&block.header)? {
                continue;
            }

            if !self.chain.has_header(&hash)? {
                self.insert_headers(vec![block.header.clone()]).await?;
            }

            if block.body.tx_root() != block.header.tx_root {
                return Err(ChainError::BodyMismatch { number });
            }

            let parent = self.chain.parent(&block.header)?;
            if !self.chain.is_block_imported(&parent)? {
                return Err(ChainError::MissingState { number });
            }

            let executor = Arc::clone(&self.chain.executor);
            let state = self.chain.state_db();
            let (block, execution) = rayon_spawn_async(move || {
                let execution = executor.apply(&block, parent.state_root, &state);
                (block, execution)
            })
            .await;
            let execution = execution?;

            if Receipt::root(&execution.receipts) != block.header.receipts_root
                || Receipt::combined_bloom(&execution.receipts) != block.header.bloom
            {
                return Err(ChainError::ReceiptsMismatch { number });
            }
            if execution.state_root != block.header.state_root {
                return Err(ChainError::StateRootMismatch { number });
            }

            let mut batch = WriteBatch::new();
            for (node_hash, node) in execution.nodes {
                batch.put(state_node_key(&node_hash), node);
            }
            batch.put_borsh(receipts_key(&hash), &execution.receipts);
            batch.put_borsh(body_key(&hash), &block.body);
            self.chain.store.write_batch(batch)?;

            imported += 1;

            if self.chain.is_canonical(&block.header)? {
                self.advance_head_block()?;
            } else {
                self.chain.emit(ChainEvent::ChainSide {
                    header: Arc::new(block.header),
                });
            }
        }

        Ok(imported)
    }

    /// Stores bodies and receipts without executing, for blocks whose headers are stored.
    ///
    /// The block head does not move, see [`ChainWriter::commit_pivot`].
    pub fn insert_receipt_chain(&mut self, blocks: Vec<(Block, Vec<Receipt>)>) -> ChainResult<usize> {
        let mut batch = WriteBatch::new();
        let len = blocks.len();

        for (block, receipts) in blocks {
            let hash = block.hash();
            let number = block.number();

            if !self.chain.has_header(&hash)? {
                return Err(ChainError::UnknownBlock(hash));
            }
            if block.body.tx_root() != block.header.tx_root {
                return Err(ChainError::BodyMismatch { number });
            }
            if Receipt::root(&receipts) != block.header.receipts_root {
                return Err(ChainError::ReceiptsMismatch { number });
            }

            batch.put_borsh(body_key(&hash), &block.body);
            batch.put_borsh(receipts_key(&hash), &receipts);
        }

        self.chain.store.write_batch(batch)?;
        Ok(len)
    }

    /// Moves the block head to the canonical block `hash` whose state was downloaded.
    ///
    /// # Errors
    /// Returns [`ChainError::MissingState`] if the block's body or state is not stored.
    pub fn commit_pivot(&mut self, pivot: &Header) -> ChainResult<()> {
        if !self.chain.is_canonical(pivot)? {
            return Err(ChainError::UnknownBlock(pivot.hash()));
        }
        if !self.chain.is_block_imported(pivot)? {
            return Err(ChainError::MissingState {
                number: pivot.number,
            });
        }

        self.chain
            .store
            .put_borsh(META_HEAD_BLOCK.to_vec(), &pivot.hash())?;

        tracing::info!(number = pivot.number, "committed pivot block");
        self.chain.emit(ChainEvent::ChainHead {
            header: Arc::new(pivot.clone()),
        });

        self.advance_head_block()
    }

    /// Rewinds both heads to the canonical block at `number`.
    ///
    /// Canonical entries above `number` are removed, the blocks themselves stay stored.
    ///
    /// Returns the new head header.
    pub fn set_head(&mut self, number: u64) -> ChainResult<Header> {
        let chain = self.chain;
        let new_head = chain
            .header_by_number(number)?
            .ok_or(ChainError::UnknownNumber(number))?;
        let old_head = chain.head_header()?;

        let mut batch = WriteBatch::new();
        for n in number + 1..=old_head.number {
            batch.delete(canonical_key(n));
        }
        batch.put_borsh(META_HEAD_HEADER.to_vec(), &new_head.hash());

        let mut head_block = chain.head_block()?;
        if head_block.number > number {
            head_block = new_head.clone();
            while !chain.is_block_imported(&head_block)? {
                head_block = chain.parent(&head_block)?;
            }
            batch.put_borsh(META_HEAD_BLOCK.to_vec(), &head_block.hash());
        }

        chain.store.write_batch(batch)?;

        tracing::info!(from = old_head.number, to = number, "rewound chain head");

        let event_head = match chain.mode() {
            SyncMode::Light => new_head.clone(),
            SyncMode::Full | SyncMode::Fast => head_block,
        };
        chain.emit(ChainEvent::ChainHead {
            header: Arc::new(event_head),
        });

        Ok(new_head)
    }
}
