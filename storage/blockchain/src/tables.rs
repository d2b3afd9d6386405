//! The key layout of the chain inside the [`KeyValueStore`](cinder_database::KeyValueStore).
//!
//! | Prefix | Key                  | Value |
//! |--------|----------------------|-------|
//! | `h`    | block hash           | [`Header`](cinder_types::Header)
//! | `w`    | block hash           | chain weight up to and including the block, `u128`
//! | `n`    | big endian height    | canonical block hash
//! | `b`    | block hash           | [`BlockBody`](cinder_types::BlockBody)
//! | `r`    | block hash           | `Vec<Receipt>`
//! | `s`    | node hash            | encoded state trie node
//! | `c`    | big endian section   | [`ChtRoot`](crate::ChtRoot)
//! | `C`    | node hash            | encoded CHT node
//! | `m`    | name                 | chain metadata, see the `META_*` keys

use cinder_types::Hash;

/// The genesis hash.
pub const META_GENESIS: &[u8] = b"m/genesis";
/// The hash of the head of the canonical header chain.
pub const META_HEAD_HEADER: &[u8] = b"m/head-header";
/// The hash of the newest canonical block whose body and state are stored.
pub const META_HEAD_BLOCK: &[u8] = b"m/head-block";

fn prefixed(prefix: u8, bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + bytes.len());
    key.push(prefix);
    key.extend_from_slice(bytes);
    key
}

pub fn header_key(hash: &Hash) -> Vec<u8> {
    prefixed(b'h', hash)
}

pub fn weight_key(hash: &Hash) -> Vec<u8> {
    prefixed(b'w', hash)
}

pub fn canonical_key(number: u64) -> Vec<u8> {
    prefixed(b'n', &number.to_be_bytes())
}

pub fn body_key(hash: &Hash) -> Vec<u8> {
    prefixed(b'b', hash)
}

pub fn receipts_key(hash: &Hash) -> Vec<u8> {
    prefixed(b'r', hash)
}

pub fn state_node_key(hash: &Hash) -> Vec<u8> {
    prefixed(b's', hash)
}

pub fn cht_root_key(section: u64) -> Vec<u8> {
    prefixed(b'c', &section.to_be_bytes())
}

pub fn cht_node_key(hash: &Hash) -> Vec<u8> {
    prefixed(b'C', hash)
}

/// The key of a height's entry inside a CHT, the entry is `(hash, weight)`.
pub fn cht_entry_key(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}
