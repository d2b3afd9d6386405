use std::io::{Read, Write};

use bitflags::bitflags;
use borsh::{BorshDeserialize, BorshSerialize};

/// The protocol versions a peer can speak.
///
/// Versions are ordered, a peer speaking a version supports every message of the older versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum ProtocolVersion {
    /// Headers, bodies, receipts and node data.
    V1,
    /// Adds state proofs and helper trie (CHT) proofs for light clients.
    V2,
}

impl ProtocolVersion {
    /// The newest version we speak.
    pub const LATEST: Self = Self::V2;
}

bitflags! {
    /// What a peer can serve.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PeerCapabilities: u8 {
        /// The peer holds full blocks, receipts and state and serves them.
        const FULL_SERVER = 0b0000_0001;
        /// The peer serves proofs to light clients.
        const LIGHT_SERVER = 0b0000_0010;
    }
}

impl BorshSerialize for PeerCapabilities {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bits().serialize(writer)
    }
}

impl BorshDeserialize for PeerCapabilities {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        // Unknown bits are from newer peers and are ignored.
        Ok(Self::from_bits_truncate(u8::deserialize_reader(reader)?))
    }
}
