//! The networks a Cinder node can join.
//!
//! `#[no_std]` compatible.
use core::{
    fmt::{Display, Formatter},
    str::FromStr,
};

const MAINNET_NETWORK_ID: u64 = 0x00c1_4de2;
const TESTNET_NETWORK_ID: u64 = 0x00c1_4de3;
const DEVNET_NETWORK_ID: u64 = 0x00c1_4de4;

/// An enum representing every Cinder network.
#[derive(Debug, Clone, Copy, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Network {
    /// Mainnet
    #[default]
    Mainnet,
    /// Testnet
    Testnet,
    /// A local development network, uses the `Faker` consensus engine by default.
    Devnet,
}

impl Network {
    /// Returns the network ID exchanged in the peer handshake.
    pub const fn network_id(&self) -> u64 {
        match self {
            Self::Mainnet => MAINNET_NETWORK_ID,
            Self::Testnet => TESTNET_NETWORK_ID,
            Self::Devnet => DEVNET_NETWORK_ID,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseNetworkError;

impl FromStr for Network {
    type Err = ParseNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("mainnet") {
            Ok(Self::Mainnet)
        } else if s.eq_ignore_ascii_case("testnet") {
            Ok(Self::Testnet)
        } else if s.eq_ignore_ascii_case("devnet") {
            Ok(Self::Devnet)
        } else {
            Err(ParseNetworkError)
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_ids_are_unique() {
        assert_ne!(Network::Mainnet.network_id(), Network::Testnet.network_id());
        assert_ne!(Network::Testnet.network_id(), Network::Devnet.network_id());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("DevNet".parse::<Network>(), Ok(Network::Devnet));
        assert_eq!("nope".parse::<Network>(), Err(ParseNetworkError));
    }
}
