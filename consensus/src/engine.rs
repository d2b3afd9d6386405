use cinder_helper::cast::{u64_to_usize, usize_to_u64};
use cinder_types::{Address, Hash, Header};

use crate::{check_header_link, ConsensusError, ConsensusValidator};

/// The length of a proof-of-work seal, a little endian nonce.
const WORK_SEAL_LEN: usize = 8;

/// The length of a proof-of-authority seal, the signer followed by its signature.
const AUTHORITY_SEAL_LEN: usize = 20 + 32;

/// The difficulty of a block sealed by the in-turn signer.
const DIFF_IN_TURN: u64 = 2;
/// The difficulty of a block sealed by any other signer.
const DIFF_NO_TURN: u64 = 1;

/// The consensus engines a node can be built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEngine {
    /// Blocks are sealed with a nonce making the work hash meet the block's difficulty.
    ProofOfWork,
    /// Blocks are sealed by one of a fixed set of signers taking turns.
    ProofOfAuthority { signers: Vec<Address> },
    /// Accepts any seal, the generic header rules are still checked.
    Faker,
}

impl ConsensusEngine {
    /// Returns the signer whose turn it is to seal block `number`.
    fn in_turn_signer(signers: &[Address], number: u64) -> Option<&Address> {
        if signers.is_empty() {
            return None;
        }

        signers.get(u64_to_usize(number % usize_to_u64(signers.len())))
    }
}

impl ConsensusValidator for ConsensusEngine {
    fn validate_header(&self, header: &Header, parent: &Header) -> Result<(), ConsensusError> {
        check_header_link(header, parent)?;
        self.validate_seal(header)
    }

    fn validate_seal(&self, header: &Header) -> Result<(), ConsensusError> {
        match self {
            Self::ProofOfWork => {
                if header.seal.len() != WORK_SEAL_LEN {
                    return Err(ConsensusError::InvalidSeal);
                }

                if !meets_difficulty(&work_hash(header), header.difficulty) {
                    tracing::debug!(number = header.number, "invalid proof of work");
                    return Err(ConsensusError::InvalidSeal);
                }

                Ok(())
            }
            Self::ProofOfAuthority { signers } => {
                let signer = authority_signer(header)?;

                if !signers.contains(&signer) {
                    return Err(ConsensusError::UnauthorizedSigner);
                }

                let expected = if Self::in_turn_signer(signers, header.number) == Some(&signer) {
                    DIFF_IN_TURN
                } else {
                    DIFF_NO_TURN
                };

                if header.difficulty != expected {
                    return Err(ConsensusError::InvalidDifficulty);
                }

                Ok(())
            }
            Self::Faker => Ok(()),
        }
    }

    fn author(&self, header: &Header) -> Result<Address, ConsensusError> {
        match self {
            Self::ProofOfWork | Self::Faker => Ok(header.coinbase),
            Self::ProofOfAuthority { .. } => authority_signer(header),
        }
    }
}

//---------------------------------------------------------------------------------------------------- Proof of work
fn work_hash(header: &Header) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&header.seal_hash());
    hasher.update(&header.seal);
    hasher.finalize().into()
}

fn meets_difficulty(hash: &Hash, difficulty: u64) -> bool {
    if difficulty == 0 {
        return false;
    }

    let mut value = [0; 8];
    value.copy_from_slice(&hash[..8]);

    u64::from_le_bytes(value) <= u64::MAX / difficulty
}

/// Searches for a nonce sealing `header` at its difficulty.
pub fn seal_work(header: &mut Header) {
    for nonce in 0_u64.. {
        header.seal = nonce.to_le_bytes().to_vec();
        if meets_difficulty(&work_hash(header), header.difficulty) {
            return;
        }
    }
}

//---------------------------------------------------------------------------------------------------- Proof of authority
fn authority_signature(header: &Header, signer: &Address) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&header.seal_hash());
    hasher.update(signer);
    hasher.finalize().into()
}

fn authority_signer(header: &Header) -> Result<Address, ConsensusError> {
    if header.seal.len() != AUTHORITY_SEAL_LEN {
        return Err(ConsensusError::InvalidSeal);
    }

    let (signer, signature) = header.seal.split_at(20);
    let signer: Address = signer.try_into().map_err(|_| ConsensusError::InvalidSeal)?;

    if authority_signature(header, &signer) != signature {
        return Err(ConsensusError::InvalidSeal);
    }

    Ok(signer)
}

/// Seals `header` as `signer`, setting the difficulty for the signer's turn.
pub fn seal_authority(header: &mut Header, signers: &[Address], signer: &Address) {
    header.difficulty = if ConsensusEngine::in_turn_signer(signers, header.number) == Some(signer) {
        DIFF_IN_TURN
    } else {
        DIFF_NO_TURN
    };

    let signature = authority_signature(header, signer);
    header.seal = [&signer[..], &signature[..]].concat();
}

#[cfg(test)]
mod tests {
    use cinder_types::{commitment::EMPTY_ROOT, Bloom};

    use super::*;

    fn header(number: u64, difficulty: u64) -> Header {
        Header {
            parent_hash: [0; 32],
            number,
            timestamp: number * 10,
            difficulty,
            coinbase: [7; 20],
            state_root: EMPTY_ROOT,
            tx_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            bloom: Bloom::default(),
            extra: vec![],
            seal: vec![],
        }
    }

    #[test]
    fn work_seal() {
        let mut header = header(1, 16);
        seal_work(&mut header);

        let engine = ConsensusEngine::ProofOfWork;
        assert_eq!(engine.validate_seal(&header), Ok(()));
        assert_eq!(engine.author(&header), Ok([7; 20]));

        header.seal.pop();
        assert_eq!(engine.validate_seal(&header), Err(ConsensusError::InvalidSeal));
    }

    #[test]
    fn authority_turns() {
        let signers = vec![[1; 20], [2; 20]];
        let engine = ConsensusEngine::ProofOfAuthority {
            signers: signers.clone(),
        };

        let mut in_turn = header(4, 0);
        seal_authority(&mut in_turn, &signers, &[1; 20]);
        assert_eq!(in_turn.difficulty, DIFF_IN_TURN);
        assert_eq!(engine.validate_seal(&in_turn), Ok(()));
        assert_eq!(engine.author(&in_turn), Ok([1; 20]));

        let mut out_of_turn = header(4, 0);
        seal_authority(&mut out_of_turn, &signers, &[2; 20]);
        assert_eq!(out_of_turn.difficulty, DIFF_NO_TURN);
        assert_eq!(engine.validate_seal(&out_of_turn), Ok(()));

        let mut stranger = header(4, 0);
        seal_authority(&mut stranger, &signers, &[3; 20]);
        assert_eq!(
            engine.validate_seal(&stranger),
            Err(ConsensusError::UnauthorizedSigner)
        );

        let mut forged = in_turn;
        forged.difficulty = DIFF_NO_TURN;
        assert_eq!(engine.validate_seal(&forged), Err(ConsensusError::InvalidSeal));
    }

    #[test]
    fn faker_accepts_any_seal() {
        let engine = ConsensusEngine::Faker;
        let mut header = header(1, 1);
        header.seal = vec![1, 2, 3];
        assert_eq!(engine.validate_seal(&header), Ok(()));
    }
}
