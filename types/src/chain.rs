//! Chain level types shared between the node's subsystems.
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{Hash, Header, Log};

/// A chain head as advertised by a peer or tracked locally.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HeadInfo {
    /// The hash of the head block.
    pub hash: Hash,
    /// The height of the head block.
    pub number: u64,
    /// The total weight (cumulative difficulty) of the chain ending at this head.
    pub weight: u128,
}

/// The origin of a header request, either a block hash or a canonical height.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum HashOrNumber {
    Hash(Hash),
    Number(u64),
}

/// The progress of the current (or last) sync.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncStatus {
    /// The local height when the sync started.
    pub starting_height: u64,
    /// The current local height.
    pub current_height: u64,
    /// The highest height we know the network has.
    pub highest_known_height: u64,
}

/// How a node keeps its copy of the chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    /// Download headers and bodies and re-execute every block.
    #[default]
    Full,
    /// Download headers, bodies and receipts, and the state at a recent pivot block,
    /// only blocks after the pivot are executed.
    Fast,
    /// Only download headers, everything else is retrieved on demand.
    Light,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSyncModeError;

impl FromStr for SyncMode {
    type Err = ParseSyncModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "fast" => Ok(Self::Fast),
            "light" => Ok(Self::Light),
            _ => Err(ParseSyncModeError),
        }
    }
}

impl Display for SyncMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Fast => "fast",
            Self::Light => "light",
        })
    }
}

/// The kinds of [`ChainEvent`] a subscriber can filter on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChainHead,
    ChainSide,
    Logs,
}

/// An event emitted when the local chain changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new canonical head, this is also emitted when the head is rolled back.
    ChainHead { header: Arc<Header> },
    /// A block was stored that is not part of the canonical chain.
    ChainSide { header: Arc<Header> },
    /// Logs emitted by a newly executed canonical block.
    Logs {
        block_hash: Hash,
        number: u64,
        logs: Arc<[Log]>,
    },
}

impl ChainEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ChainHead { .. } => EventKind::ChainHead,
            Self::ChainSide { .. } => EventKind::ChainSide,
            Self::Logs { .. } => EventKind::Logs,
        }
    }
}
