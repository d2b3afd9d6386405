use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use cinder_consensus::ConsensusEngine;
use cinder_helper::network::Network;
use cinder_types::Address;

use super::macros::config_struct;

/// The consensus engine blocks are checked with.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum EngineKind {
    /// The engine of the network, proof of work except on devnet.
    #[default]
    Network,
    ProofOfWork,
    ProofOfAuthority,
    Faker,
}

config_struct! {
    /// The consensus config.
    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct ConsensusConfig {
        /// The engine blocks are checked with.
        ///
        /// "Network" picks the network's engine, "Faker"
        /// only checks the generic header rules.
        ///
        /// Valid values | "Network", "ProofOfWork", "ProofOfAuthority", "Faker"
        pub engine: EngineKind,

        /// The accounts allowed to seal blocks with "ProofOfAuthority".
        ///
        /// Type         | Array of 20 byte hex strings
        /// Examples     | ["00112233445566778899aabbccddeeff00112233"]
        pub signers: Vec<String>,
    }
}

impl ConsensusConfig {
    /// The [`ConsensusEngine`] to run on `network`.
    ///
    /// # Errors
    /// Fails if a signer is not a hex encoded address, or proof of authority has no signers.
    pub fn engine(&self, network: Network) -> anyhow::Result<ConsensusEngine> {
        Ok(match (self.engine, network) {
            (EngineKind::Network, Network::Mainnet | Network::Testnet)
            | (EngineKind::ProofOfWork, _) => ConsensusEngine::ProofOfWork,
            (EngineKind::Network, Network::Devnet) | (EngineKind::Faker, _) => {
                ConsensusEngine::Faker
            }
            (EngineKind::ProofOfAuthority, _) => {
                let signers = self
                    .signers
                    .iter()
                    .map(|signer| parse_address(signer))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                if signers.is_empty() {
                    bail!("proof of authority needs at least one signer");
                }
                ConsensusEngine::ProofOfAuthority { signers }
            }
        })
    }
}

fn parse_address(s: &str) -> anyhow::Result<Address> {
    let mut address = Address::default();
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut address)
        .with_context(|| format!("invalid signer address: {s}"))?;
    Ok(address)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn network_picks_the_engine() {
        let config = ConsensusConfig::default();
        assert_eq!(
            config.engine(Network::Mainnet).unwrap(),
            ConsensusEngine::ProofOfWork
        );
        assert_eq!(config.engine(Network::Devnet).unwrap(), ConsensusEngine::Faker);
    }

    #[test]
    fn authority_signers_are_parsed() {
        let mut config = ConsensusConfig {
            engine: EngineKind::ProofOfAuthority,
            signers: vec![],
        };
        assert!(config.engine(Network::Testnet).is_err());

        config.signers = vec!["0x0101010101010101010101010101010101010101".to_string()];
        assert_eq!(
            config.engine(Network::Testnet).unwrap(),
            ConsensusEngine::ProofOfAuthority {
                signers: vec![[1; 20]]
            }
        );

        config.signers.push("not hex".to_string());
        assert!(config.engine(Network::Testnet).is_err());
    }
}
