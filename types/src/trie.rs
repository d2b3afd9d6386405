//! A hexary merkle trie.
//!
//! Keys are split into nibbles, every node is referenced by the [`blake3`] hash of
//! its [`borsh`] encoding. The trie has two node kinds:
//!
//! - [`TrieNode::Branch`], 16 optional children and an optional value for a key ending here.
//! - [`TrieNode::Leaf`], the remaining nibbles of exactly one key and its value.
//!
//! The shape of a trie only depends on its contents, so two tries with the same
//! entries always have the same root.
//!
//! Proofs are the list of encoded nodes on the path from the root towards a key,
//! they prove both presence and absence.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{commitment::EMPTY_ROOT, Hash};

//---------------------------------------------------------------------------------------------------- TrieError
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    /// A node needed to walk the trie was not available.
    #[error("trie node {} is missing", hex::encode(.0))]
    MissingNode(Hash),
    /// A node's hash did not match the hash its parent references.
    #[error("trie node hash mismatch")]
    HashMismatch,
    /// A node could not be decoded.
    #[error("invalid trie node encoding")]
    InvalidNode,
    /// A proof ended before the walk reached a leaf or an empty slot.
    #[error("trie proof is incomplete")]
    Incomplete,
    /// A proof had nodes left over after the walk finished.
    #[error("trie proof has unused nodes")]
    ExtraNodes,
}

//---------------------------------------------------------------------------------------------------- TrieNode
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TrieNode {
    Branch {
        children: [Option<Hash>; 16],
        value: Option<Vec<u8>>,
    },
    Leaf {
        /// The remaining nibbles of the key.
        path: Vec<u8>,
        value: Vec<u8>,
    },
}

impl TrieNode {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("serializing to a vec can not fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        Self::try_from_slice(bytes).map_err(|_| TrieError::InvalidNode)
    }

    /// The hashes of the nodes this node references.
    pub fn child_hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        let children: &[Option<Hash>] = match self {
            Self::Branch { children, .. } => children,
            Self::Leaf { .. } => &[],
        };
        children.iter().flatten().copied()
    }
}

/// The hash an encoded node is referenced by.
pub fn node_hash(encoded: &[u8]) -> Hash {
    blake3::hash(encoded).into()
}

/// Splits `key` into nibbles, high nibble first.
pub fn key_to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

//---------------------------------------------------------------------------------------------------- Building
/// A freshly built (or updated) trie.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrieBuild {
    pub root: Hash,
    /// Every new node, keyed by its hash.
    pub nodes: BTreeMap<Hash, Vec<u8>>,
}

impl TrieBuild {
    fn store(&mut self, node: &TrieNode) -> Hash {
        let encoded = node.encode();
        let hash = node_hash(&encoded);
        self.nodes.insert(hash, encoded);
        hash
    }
}

/// Builds a trie holding every entry in `entries`.
///
/// An empty map has the root [`EMPTY_ROOT`] and no nodes.
pub fn build_trie(entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> TrieBuild {
    let mut build = TrieBuild {
        root: EMPTY_ROOT,
        nodes: BTreeMap::new(),
    };

    if entries.is_empty() {
        return build;
    }

    let entries = entries
        .iter()
        .map(|(k, v)| (key_to_nibbles(k), v.clone()))
        .collect::<Vec<_>>();

    build.root = build_level(&entries, 0, &mut build);
    build
}

/// Builds the sub-trie of `entries` (sorted, all sharing the first `depth` nibbles).
fn build_level(entries: &[(Vec<u8>, Vec<u8>)], depth: usize, build: &mut TrieBuild) -> Hash {
    if let [(path, value)] = entries {
        return build.store(&TrieNode::Leaf {
            path: path[depth..].to_vec(),
            value: value.clone(),
        });
    }

    let mut children = [None; 16];
    let mut value = None;

    let mut rest = entries;
    if let Some(((path, v), tail)) = rest.split_first() {
        // Sorted order puts a key ending at this depth first.
        if path.len() == depth {
            value = Some(v.clone());
            rest = tail;
        }
    }

    while let Some((first, _)) = rest.first() {
        let nibble = first[depth];
        let end = rest
            .iter()
            .position(|(p, _)| p[depth] != nibble)
            .unwrap_or(rest.len());

        children[usize::from(nibble)] = Some(build_level(&rest[..end], depth + 1, build));
        rest = &rest[end..];
    }

    build.store(&TrieNode::Branch { children, value })
}

/// Inserts (or replaces) `key` in the trie at `root`.
///
/// `load` returns the encoding of an existing node, the returned [`TrieBuild`] only
/// holds the nodes that had to be created.
pub fn insert<F>(root: Hash, key: &[u8], value: Vec<u8>, mut load: F) -> Result<TrieBuild, TrieError>
where
    F: FnMut(&Hash) -> Option<Vec<u8>>,
{
    let mut build = TrieBuild::default();
    let root = (root != EMPTY_ROOT).then_some(root);

    build.root = insert_at(root, &key_to_nibbles(key), value, &mut load, &mut build)?;
    Ok(build)
}

fn insert_at<F>(
    node: Option<Hash>,
    nibbles: &[u8],
    value: Vec<u8>,
    load: &mut F,
    build: &mut TrieBuild,
) -> Result<Hash, TrieError>
where
    F: FnMut(&Hash) -> Option<Vec<u8>>,
{
    let Some(hash) = node else {
        return Ok(build.store(&TrieNode::Leaf {
            path: nibbles.to_vec(),
            value,
        }));
    };

    let encoded = load(&hash).ok_or(TrieError::MissingNode(hash))?;

    match TrieNode::decode(&encoded)? {
        TrieNode::Leaf { path, .. } if path == nibbles => {
            Ok(build.store(&TrieNode::Leaf { path, value }))
        }
        TrieNode::Leaf { path, value: old } => {
            let mut entries = vec![(path, old), (nibbles.to_vec(), value)];
            entries.sort();
            Ok(build_level(&entries, 0, build))
        }
        TrieNode::Branch {
            mut children,
            value: old,
        } => {
            let Some((nibble, rest)) = nibbles.split_first() else {
                return Ok(build.store(&TrieNode::Branch {
                    children,
                    value: Some(value),
                }));
            };

            let slot = &mut children[usize::from(*nibble)];
            *slot = Some(insert_at(*slot, rest, value, load, build)?);

            Ok(build.store(&TrieNode::Branch {
                children,
                value: old,
            }))
        }
    }
}

//---------------------------------------------------------------------------------------------------- Reading
/// Walks from `root` towards `key`, `load` turns a node hash into a node.
fn walk<F>(root: Hash, key: &[u8], mut load: F) -> Result<Option<Vec<u8>>, TrieError>
where
    F: FnMut(&Hash) -> Result<TrieNode, TrieError>,
{
    if root == EMPTY_ROOT {
        return Ok(None);
    }

    let nibbles = key_to_nibbles(key);
    let mut remaining = nibbles.as_slice();
    let mut next = root;

    loop {
        match load(&next)? {
            TrieNode::Leaf { path, value } => {
                return Ok((path == remaining).then_some(value));
            }
            TrieNode::Branch { children, value } => {
                let Some((nibble, rest)) = remaining.split_first() else {
                    return Ok(value);
                };

                match children[usize::from(*nibble)] {
                    Some(child) => {
                        next = child;
                        remaining = rest;
                    }
                    None => return Ok(None),
                }
            }
        }
    }
}

/// Looks up `key` in a trie whose nodes `get` can return.
pub fn get<F>(root: Hash, key: &[u8], mut get: F) -> Result<Option<Vec<u8>>, TrieError>
where
    F: FnMut(&Hash) -> Option<Vec<u8>>,
{
    walk(root, key, |hash| {
        let encoded = get(hash).ok_or(TrieError::MissingNode(*hash))?;
        TrieNode::decode(&encoded)
    })
}

/// Creates a proof for `key`, the proof shows either the value or its absence.
pub fn prove<F>(root: Hash, key: &[u8], mut get: F) -> Result<Vec<Vec<u8>>, TrieError>
where
    F: FnMut(&Hash) -> Option<Vec<u8>>,
{
    let mut proof = Vec::new();

    walk(root, key, |hash| {
        let encoded = get(hash).ok_or(TrieError::MissingNode(*hash))?;
        let node = TrieNode::decode(&encoded)?;
        proof.push(encoded);
        Ok(node)
    })?;

    Ok(proof)
}

/// Verifies `proof` against `root`, returning the value of `key` if it is present.
///
/// Every node must hash to the reference its parent holds, and the proof must hold
/// exactly the nodes on the path.
pub fn verify_proof(root: Hash, key: &[u8], proof: &[Vec<u8>]) -> Result<Option<Vec<u8>>, TrieError> {
    let mut nodes = proof.iter();

    let value = walk(root, key, |hash| {
        let encoded = nodes.next().ok_or(TrieError::Incomplete)?;
        if node_hash(encoded) != *hash {
            return Err(TrieError::HashMismatch);
        }
        TrieNode::decode(encoded)
    })?;

    if nodes.next().is_some() {
        return Err(TrieError::ExtraNodes);
    }

    Ok(value)
}
