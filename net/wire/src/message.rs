use borsh::{BorshDeserialize, BorshSerialize};

use cinder_types::{Block, Hash, HeadInfo};

use crate::{PeerCapabilities, ProtocolRequest, ProtocolResponse, ProtocolVersion};

/// The handshake message, both sides send one as their first message.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Status {
    pub version: ProtocolVersion,
    pub network_id: u64,
    pub genesis: Hash,
    pub head: HeadInfo,
    pub capabilities: PeerCapabilities,
}

/// A request with its correlation id.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PeerRequest {
    pub id: u64,
    pub request: ProtocolRequest,
}

/// A response, `id` is the id of the [`PeerRequest`] it answers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PeerResponse {
    pub id: u64,
    pub response: ProtocolResponse,
}

/// A block hash announcement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockAnnouncement {
    pub hash: Hash,
    pub number: u64,
    /// The weight of the chain ending at this block.
    pub weight: u128,
}

/// A propagated full block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewBlock {
    pub block: Block,
    /// The weight of the chain ending at this block.
    pub weight: u128,
}

/// Every message on the wire.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Status(Status),
    Request(PeerRequest),
    Response(PeerResponse),
    NewBlockHashes(Vec<BlockAnnouncement>),
    NewBlock(Box<NewBlock>),
}

impl Message {
    /// A short name for this message, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::NewBlockHashes(_) => "new block hashes",
            Self::NewBlock(_) => "new block",
        }
    }
}
