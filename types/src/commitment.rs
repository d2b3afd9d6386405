//! Binary merkle commitments over transactions and receipts.
use crate::{borsh_hash, Hash, Receipt, Transaction};

/// The root of an empty list, and of an empty trie.
pub const EMPTY_ROOT: Hash = [0; 32];

/// Computes a binary merkle root over `leaves`.
///
/// An odd node at any level is paired with itself.
pub fn merkle_root(mut leaves: Vec<Hash>) -> Hash {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }

    while leaves.len() > 1 {
        leaves = leaves
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);

                let mut hasher = blake3::Hasher::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }

    leaves[0]
}

/// The merkle root over a list of transactions.
pub fn tx_root(txs: &[Transaction]) -> Hash {
    merkle_root(txs.iter().map(Transaction::hash).collect())
}

/// The merkle root over a list of receipts.
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    merkle_root(receipts.iter().map(borsh_hash).collect())
}
