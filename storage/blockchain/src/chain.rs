//! The local chain; `struct BlockChain`.

//---------------------------------------------------------------------------------------------------- Import
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use tokio::sync::{broadcast, Mutex};

use cinder_consensus::ConsensusValidator;
use cinder_database::{KeyValueStore, StoreExt, WriteBatch};
use cinder_types::{
    commitment::EMPTY_ROOT,
    trie::{self, node_hash},
    BlockBody, ChainEvent, Hash, HeadInfo, Header, Receipt, SyncMode,
};

use crate::{
    executor::{StateDb, StateExecutor},
    tables::{
        body_key, canonical_key, cht_node_key, cht_root_key, header_key, receipts_key,
        state_node_key, weight_key, META_GENESIS, META_HEAD_BLOCK, META_HEAD_HEADER,
    },
    ChainError, Genesis,
};

//---------------------------------------------------------------------------------------------------- Constants
/// The capacity of the [`ChainEvent`] channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A `Result` with a [`ChainError`].
pub type ChainResult<T> = Result<T, ChainError>;

//---------------------------------------------------------------------------------------------------- BlockChain
/// The local chain.
///
/// The chain keeps two heads:
///
/// - The header head, the heaviest known header chain, this defines the canonical mapping.
/// - The block head, the newest canonical block whose body and post-state are stored.
///
/// In [`SyncMode::Light`] only headers are stored and the block head stays at genesis.
///
/// Reads can happen from anywhere, every write that can move a head goes through the
/// single [`ChainWriter`](crate::ChainWriter) returned by [`BlockChain::writer`].
pub struct BlockChain {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) consensus: Arc<dyn ConsensusValidator>,
    pub(crate) executor: Arc<dyn StateExecutor>,
    mode: SyncMode,
    genesis: Header,
    events: broadcast::Sender<ChainEvent>,
    pub(crate) gate: Mutex<()>,
}

impl BlockChain {
    /// Opens the chain stored in `store`, writing `genesis` if the store is empty.
    ///
    /// # Errors
    /// Returns [`ChainError::GenesisMismatch`] if the store holds a chain with another genesis.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        genesis: &Genesis,
        consensus: Arc<dyn ConsensusValidator>,
        executor: Arc<dyn StateExecutor>,
        mode: SyncMode,
    ) -> ChainResult<Self> {
        let (genesis_block, state) = genesis.to_block();
        let genesis_hash = genesis_block.hash();

        match store.get_borsh::<Hash>(META_GENESIS)? {
            Some(stored) if stored != genesis_hash => return Err(ChainError::GenesisMismatch),
            Some(_) => (),
            None => {
                tracing::info!(hash = hex::encode(genesis_hash), "writing genesis block");

                let mut batch = WriteBatch::new();
                batch.put_borsh(header_key(&genesis_hash), &genesis_block.header);
                batch.put_borsh(
                    weight_key(&genesis_hash),
                    &u128::from(genesis_block.header.difficulty),
                );
                batch.put_borsh(canonical_key(0), &genesis_hash);
                batch.put_borsh(body_key(&genesis_hash), &genesis_block.body);
                batch.put_borsh(receipts_key(&genesis_hash), &Vec::<Receipt>::new());
                for (hash, node) in state.nodes {
                    batch.put(state_node_key(&hash), node);
                }
                batch.put_borsh(META_HEAD_HEADER.to_vec(), &genesis_hash);
                batch.put_borsh(META_HEAD_BLOCK.to_vec(), &genesis_hash);
                batch.put_borsh(META_GENESIS.to_vec(), &genesis_hash);
                store.write_batch(batch)?;
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            consensus,
            executor,
            mode,
            genesis: genesis_block.header,
            events,
            gate: Mutex::new(()),
        })
    }

    //------------------------------------------------ Accessors
    pub const fn mode(&self) -> SyncMode {
        self.mode
    }

    pub const fn genesis(&self) -> &Header {
        &self.genesis
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis.hash()
    }

    /// The store the chain lives in, other subsystems persist their own records next to it.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn consensus(&self) -> &Arc<dyn ConsensusValidator> {
        &self.consensus
    }

    /// Subscribe to [`ChainEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ChainEvent) {
        // No subscribers is not an error.
        drop(self.events.send(event));
    }

    //------------------------------------------------ Headers
    pub fn header(&self, hash: &Hash) -> ChainResult<Option<Header>> {
        Ok(self.store.get_borsh(&header_key(hash))?)
    }

    pub fn has_header(&self, hash: &Hash) -> ChainResult<bool> {
        Ok(self.store.contains(&header_key(hash))?)
    }

    /// The weight of the chain ending at `hash`.
    pub fn weight(&self, hash: &Hash) -> ChainResult<Option<u128>> {
        Ok(self.store.get_borsh(&weight_key(hash))?)
    }

    /// The canonical block hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> ChainResult<Option<Hash>> {
        Ok(self.store.get_borsh(&canonical_key(number))?)
    }

    /// The canonical header at `number`.
    pub fn header_by_number(&self, number: u64) -> ChainResult<Option<Header>> {
        match self.canonical_hash(number)? {
            Some(hash) => self.header(&hash),
            None => Ok(None),
        }
    }

    /// Returns `true` if `hash` is on the canonical chain.
    pub fn is_canonical(&self, header: &Header) -> ChainResult<bool> {
        Ok(self.canonical_hash(header.number)? == Some(header.hash()))
    }

    fn meta_header(&self, key: &[u8]) -> ChainResult<Header> {
        let hash = self
            .store
            .get_borsh::<Hash>(key)?
            .ok_or(ChainError::UnknownBlock([0; 32]))?;
        self.header(&hash)?.ok_or(ChainError::UnknownBlock(hash))
    }

    /// The head of the canonical header chain.
    pub fn head_header(&self) -> ChainResult<Header> {
        self.meta_header(META_HEAD_HEADER)
    }

    /// The newest canonical block with its body and state stored.
    pub fn head_block(&self) -> ChainResult<Header> {
        self.meta_header(META_HEAD_BLOCK)
    }

    /// The head this node advertises to peers and syncs from.
    ///
    /// This is the header head for light nodes and the block head otherwise.
    pub fn head(&self) -> ChainResult<Header> {
        match self.mode {
            SyncMode::Light => self.head_header(),
            SyncMode::Full | SyncMode::Fast => self.head_block(),
        }
    }

    /// [`BlockChain::head`] with its weight.
    pub fn head_info(&self) -> ChainResult<HeadInfo> {
        let head = self.head()?;
        let hash = head.hash();
        Ok(HeadInfo {
            hash,
            number: head.number,
            weight: self.weight(&hash)?.ok_or(ChainError::UnknownBlock(hash))?,
        })
    }

    //------------------------------------------------ Bodies & receipts
    pub fn body(&self, hash: &Hash) -> ChainResult<Option<BlockBody>> {
        Ok(self.store.get_borsh(&body_key(hash))?)
    }

    pub fn has_body(&self, hash: &Hash) -> ChainResult<bool> {
        Ok(self.store.contains(&body_key(hash))?)
    }

    pub fn receipts(&self, hash: &Hash) -> ChainResult<Option<Vec<Receipt>>> {
        Ok(self.store.get_borsh(&receipts_key(hash))?)
    }

    /// Stores a body that was checked against its header by the caller.
    pub fn write_body(&self, hash: &Hash, body: &BlockBody) -> ChainResult<()> {
        self.store.put_borsh(body_key(hash), body)?;
        Ok(())
    }

    /// Stores receipts that were checked against their header by the caller.
    pub fn write_receipts(&self, hash: &Hash, receipts: &[Receipt]) -> ChainResult<()> {
        self.store.put_borsh(receipts_key(hash), receipts)?;
        Ok(())
    }

    /// Stores a header that is not (yet) linked to the local chain, it is not made canonical.
    pub fn write_detached_header(&self, header: &Header) -> ChainResult<()> {
        self.store.put_borsh(header_key(&header.hash()), header)?;
        Ok(())
    }

    /// Returns `true` if the block with this header can be built on, its body and state are stored.
    pub fn is_block_imported(&self, header: &Header) -> ChainResult<bool> {
        Ok(self.has_body(&header.hash())? && self.has_state(&header.state_root)?)
    }

    //------------------------------------------------ State
    /// Returns `true` if the state trie with root `root` is stored.
    ///
    /// Only the root node is checked, tries are always written with all their nodes.
    pub fn has_state(&self, root: &Hash) -> ChainResult<bool> {
        if *root == EMPTY_ROOT {
            return Ok(true);
        }
        Ok(self.store.contains(&state_node_key(root))?)
    }

    pub fn state_node(&self, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.store.get(&state_node_key(hash))?)
    }

    /// Reads `key` from the state trie with root `root`.
    pub fn state_value(&self, root: Hash, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(trie::get(root, key, |hash| {
            self.store.get(&state_node_key(hash)).ok().flatten()
        })?)
    }

    /// Stores state trie nodes, each under its own hash.
    pub fn write_state_nodes(&self, nodes: impl IntoIterator<Item = Vec<u8>>) -> ChainResult<()> {
        let mut batch = WriteBatch::new();
        for node in nodes {
            batch.put(state_node_key(&node_hash(&node)), node);
        }
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// A [`StateDb`] reading from this chain's store.
    pub(crate) fn state_db(&self) -> ChainState {
        ChainState(Arc::clone(&self.store))
    }

    //------------------------------------------------ CHT
    /// The root of the canonical hash trie of `section`.
    ///
    /// A root built from local headers is only returned while the block it ends at is
    /// still canonical, a reorganised section reads as [`None`] before the indexer drops it.
    pub fn cht_root(&self, section: u64) -> ChainResult<Option<Hash>> {
        let Some(record) = self.store.get_borsh::<ChtRoot>(&cht_root_key(section))? else {
            return Ok(None);
        };

        match record.head {
            Some((number, hash)) if self.canonical_hash(number)? != Some(hash) => Ok(None),
            Some(_) | None => Ok(Some(record.root)),
        }
    }

    /// Stores a CHT root obtained out of band, it is served without the headers it covers.
    pub fn write_trusted_cht_root(&self, section: u64, root: Hash) -> ChainResult<()> {
        self.store
            .put_borsh(cht_root_key(section), &ChtRoot { root, head: None })?;
        Ok(())
    }

    pub fn cht_node(&self, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.store.get(&cht_node_key(hash))?)
    }

    //------------------------------------------------ Ancestors
    /// Finds the newest common ancestor of `a` and `b`.
    pub fn common_ancestor(&self, a: &Header, b: &Header) -> ChainResult<Header> {
        let mut a = a.clone();
        let mut b = b.clone();

        while a.number > b.number {
            a = self.parent(&a)?;
        }
        while b.number > a.number {
            b = self.parent(&b)?;
        }
        while a.hash() != b.hash() {
            a = self.parent(&a)?;
            b = self.parent(&b)?;
        }

        Ok(a)
    }

    pub(crate) fn parent(&self, header: &Header) -> ChainResult<Header> {
        self.header(&header.parent_hash)?
            .ok_or(ChainError::UnknownParent(header.parent_hash))
    }
}

//---------------------------------------------------------------------------------------------------- ChtRoot
/// The record stored under [`cht_root_key`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChtRoot {
    pub root: Hash,
    /// The height and hash of the last block the trie covers, [`None`] for a trusted root.
    pub head: Option<(u64, Hash)>,
}

//---------------------------------------------------------------------------------------------------- ChainState
/// Read access to the state trie nodes in a [`KeyValueStore`].
pub(crate) struct ChainState(Arc<dyn KeyValueStore>);

impl StateDb for ChainState {
    fn node(&self, hash: &Hash) -> Option<Vec<u8>> {
        self.0.get(&state_node_key(hash)).ok().flatten()
    }
}
