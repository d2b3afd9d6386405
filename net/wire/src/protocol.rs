//! Request/response messages.

use std::fmt::{Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use cinder_types::{BlockBody, Hash, HashOrNumber, Header, Receipt};

use crate::ProtocolVersion;

/// A state proof request, the proof of `key` in the state trie with root `root`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ProofRequest {
    pub root: Hash,
    pub key: Vec<u8>,
}

/// A helper trie request, the canonical hash at `number` proven against the CHT of `section`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct HelperTrieRequest {
    pub section: u64,
    pub number: u64,
}

/// The answer to one [`HelperTrieRequest`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HelperTrieProof {
    /// The trie nodes proving the `(hash, weight)` entry for the requested height.
    pub proof: Vec<Vec<u8>>,
    /// The header at the requested height, if the server has it.
    pub header: Option<Header>,
}

/// The kind of a [`ProtocolRequest`]/[`ProtocolResponse`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    BlockHeaders,
    BlockBodies,
    Receipts,
    NodeData,
    Proofs,
    HelperTrieProofs,
}

impl RequestKind {
    /// The protocol version a peer must speak to be sent this request.
    pub const fn min_version(self) -> ProtocolVersion {
        match self {
            Self::BlockHeaders | Self::BlockBodies | Self::Receipts | Self::NodeData => {
                ProtocolVersion::V1
            }
            Self::Proofs | Self::HelperTrieProofs => ProtocolVersion::V2,
        }
    }
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BlockHeaders => "block headers",
            Self::BlockBodies => "block bodies",
            Self::Receipts => "receipts",
            Self::NodeData => "node data",
            Self::Proofs => "proofs",
            Self::HelperTrieProofs => "helper trie proofs",
        })
    }
}

/// A request for chain data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum ProtocolRequest {
    /// `amount` headers starting at `origin`, with `skip` headers left out between each
    /// returned header, walking towards genesis if `reverse` is set.
    GetBlockHeaders {
        origin: HashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    },
    GetBlockBodies(Vec<Hash>),
    GetReceipts(Vec<Hash>),
    /// Trie nodes by hash.
    GetNodeData(Vec<Hash>),
    GetProofs(Vec<ProofRequest>),
    GetHelperTrieProofs(Vec<HelperTrieRequest>),
}

impl ProtocolRequest {
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::GetBlockHeaders { .. } => RequestKind::BlockHeaders,
            Self::GetBlockBodies(_) => RequestKind::BlockBodies,
            Self::GetReceipts(_) => RequestKind::Receipts,
            Self::GetNodeData(_) => RequestKind::NodeData,
            Self::GetProofs(_) => RequestKind::Proofs,
            Self::GetHelperTrieProofs(_) => RequestKind::HelperTrieProofs,
        }
    }

    /// The amount of items requested.
    pub fn len(&self) -> usize {
        match self {
            Self::GetBlockHeaders { amount, .. } => usize::try_from(*amount).unwrap_or(usize::MAX),
            Self::GetBlockBodies(hashes) | Self::GetReceipts(hashes) | Self::GetNodeData(hashes) => {
                hashes.len()
            }
            Self::GetProofs(reqs) => reqs.len(),
            Self::GetHelperTrieProofs(reqs) => reqs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A response to a [`ProtocolRequest`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProtocolResponse {
    BlockHeaders(Vec<Header>),
    BlockBodies(Vec<BlockBody>),
    Receipts(Vec<Vec<Receipt>>),
    NodeData(Vec<Vec<u8>>),
    /// One list of trie nodes per [`ProofRequest`].
    Proofs(Vec<Vec<Vec<u8>>>),
    HelperTrieProofs(Vec<HelperTrieProof>),
}

impl ProtocolResponse {
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::BlockHeaders(_) => RequestKind::BlockHeaders,
            Self::BlockBodies(_) => RequestKind::BlockBodies,
            Self::Receipts(_) => RequestKind::Receipts,
            Self::NodeData(_) => RequestKind::NodeData,
            Self::Proofs(_) => RequestKind::Proofs,
            Self::HelperTrieProofs(_) => RequestKind::HelperTrieProofs,
        }
    }

    /// The amount of items in this response.
    pub fn len(&self) -> usize {
        match self {
            Self::BlockHeaders(v) => v.len(),
            Self::BlockBodies(v) => v.len(),
            Self::Receipts(v) => v.len(),
            Self::NodeData(v) => v.len(),
            Self::Proofs(v) => v.len(),
            Self::HelperTrieProofs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
