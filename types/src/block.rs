//! Blocks, headers, receipts and logs.

//---------------------------------------------------------------------------------------------------- Import
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    borsh_hash,
    commitment::{receipts_root, tx_root, EMPTY_ROOT},
    Address, Bloom, Hash,
};

//---------------------------------------------------------------------------------------------------- Header
/// The commitment record for one block.
///
/// A header links to its parent by hash and commits to the block's transactions,
/// the receipts produced by executing them and the resulting state.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    /// The hash of the parent header.
    pub parent_hash: Hash,
    /// The height of this block, the genesis block is `0`.
    pub number: u64,
    /// UNIX timestamp in seconds.
    pub timestamp: u64,
    /// The amount of work this block adds to the chain's weight.
    pub difficulty: u64,
    /// The account credited with producing this block.
    pub coinbase: Address,
    /// The root of the state trie after this block has been executed.
    pub state_root: Hash,
    /// The merkle root of the block's transactions.
    pub tx_root: Hash,
    /// The merkle root of the block's receipts.
    pub receipts_root: Hash,
    /// The union of the blooms of every receipt in this block.
    pub bloom: Bloom,
    /// Arbitrary extra data, bounded by consensus.
    pub extra: Vec<u8>,
    /// The consensus seal, the contents are defined by the consensus engine.
    pub seal: Vec<u8>,
}

impl Header {
    /// The hash of this header.
    pub fn hash(&self) -> Hash {
        borsh_hash(self)
    }

    /// The hash of this header without the [`Header::seal`], this is what consensus engines seal.
    pub fn seal_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for field in [
            &self.parent_hash[..],
            &self.number.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            &self.difficulty.to_le_bytes(),
            &self.coinbase,
            &self.state_root,
            &self.tx_root,
            &self.receipts_root,
            &self.bloom.0,
            &self.extra,
        ] {
            hasher.update(field);
        }
        hasher.finalize().into()
    }

    /// Returns `true` if this block has no transactions, so no body needs fetching.
    pub fn has_empty_body(&self) -> bool {
        self.tx_root == EMPTY_ROOT
    }

    /// Returns `true` if this block has no receipts.
    pub fn has_empty_receipts(&self) -> bool {
        self.receipts_root == EMPTY_ROOT
    }
}

//---------------------------------------------------------------------------------------------------- Transaction
/// An opaque transaction.
///
/// The meaning of the bytes is defined by the state executor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    pub fn hash(&self) -> Hash {
        blake3::hash(&self.0).into()
    }
}

//---------------------------------------------------------------------------------------------------- BlockBody
/// The payload of a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    /// The merkle root of this body's transactions, compared against [`Header::tx_root`].
    pub fn tx_root(&self) -> Hash {
        tx_root(&self.transactions)
    }
}

//---------------------------------------------------------------------------------------------------- Block
/// A full block, a [`Header`] and its [`BlockBody`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub body: BlockBody,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub const fn number(&self) -> u64 {
        self.header.number
    }
}

//---------------------------------------------------------------------------------------------------- Receipt
/// An event emitted by a transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// The outcome of executing one transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Receipt {
    /// `true` if the transaction succeeded.
    pub success: bool,
    /// The logs emitted by the transaction.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// The bloom over this receipt's log addresses and topics.
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::default();
        for log in &self.logs {
            bloom.accrue(&log.address);
            for topic in &log.topics {
                bloom.accrue(topic);
            }
        }
        bloom
    }

    /// The union of the blooms of every receipt in `receipts`.
    pub fn combined_bloom(receipts: &[Self]) -> Bloom {
        let mut bloom = Bloom::default();
        for receipt in receipts {
            bloom.union(&receipt.bloom());
        }
        bloom
    }

    /// The merkle root of `receipts`, compared against [`Header::receipts_root`].
    pub fn root(receipts: &[Self]) -> Hash {
        receipts_root(receipts)
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            parent_hash: [1; 32],
            number: 7,
            timestamp: 70,
            difficulty: 2,
            coinbase: [3; 20],
            state_root: [4; 32],
            tx_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            bloom: Bloom::default(),
            extra: vec![],
            seal: vec![9; 8],
        }
    }

    #[test]
    fn seal_hash_ignores_seal() {
        let a = header();
        let mut b = header();
        b.seal = vec![];

        assert_eq!(a.seal_hash(), b.seal_hash());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn empty_body_matches_empty_root() {
        let header = header();
        assert!(header.has_empty_body());
        assert_eq!(BlockBody::default().tx_root(), header.tx_root);
    }

    #[test]
    fn receipt_bloom_covers_logs() {
        let receipt = Receipt {
            success: true,
            logs: vec![Log {
                address: [5; 20],
                topics: vec![[6; 32]],
                data: vec![],
            }],
        };

        let bloom = Receipt::combined_bloom(&[receipt]);
        assert!(bloom.contains_input(&[5; 20]));
        assert!(bloom.contains_input(&[6; 32]));
    }
}
