//! Cinder shared data types.
//!
//! This crate holds the ledger primitives every other Cinder crate speaks in:
//! headers, bodies, receipts and logs, the commitments a header makes over them,
//! and the hexary trie used for state and canonical-hash tries.
//!
//! The canonical binary encoding of every type is [`borsh`] and the hash function
//! is [`blake3`].

mod block;
mod bloom;
mod chain;
pub mod commitment;
pub mod trie;

pub use block::{Block, BlockBody, Header, Log, Receipt, Transaction};
pub use bloom::{Bloom, BLOOM_BYTES};
pub use chain::{
    ChainEvent, EventKind, HashOrNumber, HeadInfo, ParseSyncModeError, SyncMode, SyncStatus,
};

/// A 32 byte [`blake3`] digest.
pub type Hash = [u8; 32];

/// A 20 byte account address.
pub type Address = [u8; 20];

/// Hashes the [`borsh`] encoding of `value`.
pub fn borsh_hash<T: borsh::BorshSerialize + ?Sized>(value: &T) -> Hash {
    let mut hasher = blake3::Hasher::new();
    value
        .serialize(&mut hasher)
        .expect("writing to a hasher can not fail");
    hasher.finalize().into()
}
