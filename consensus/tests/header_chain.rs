use proptest::prelude::*;

use cinder_consensus::{seal_work, validate_header_chain, ConsensusEngine, ConsensusError};
use cinder_types::{commitment::EMPTY_ROOT, Bloom, Header};

fn genesis() -> Header {
    Header {
        parent_hash: [0; 32],
        number: 0,
        timestamp: 1_000,
        difficulty: 1,
        coinbase: [0; 20],
        state_root: EMPTY_ROOT,
        tx_root: EMPTY_ROOT,
        receipts_root: EMPTY_ROOT,
        bloom: Bloom::default(),
        extra: vec![],
        seal: vec![],
    }
}

fn extend(parent: &Header, n: usize) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::with_capacity(n);
    for _ in 0..n {
        let parent = out.last().unwrap_or(parent);
        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 10,
            difficulty: 4,
            ..genesis()
        };
        seal_work(&mut header);
        out.push(header);
    }
    out
}

#[test]
fn valid_chain() {
    let genesis = genesis();
    let headers = extend(&genesis, 16);

    assert_eq!(
        validate_header_chain(&ConsensusEngine::ProofOfWork, &genesis, &headers),
        Ok(())
    );
}

#[test]
fn bad_seal_reports_first_index() {
    let genesis = genesis();
    let mut headers = extend(&genesis, 8);
    headers[5].seal.clear();
    headers[6].seal.clear();

    // The header hash covers the seal, relink the rest.
    for i in 6..8 {
        headers[i].parent_hash = headers[i - 1].hash();
    }

    assert_eq!(
        validate_header_chain(&ConsensusEngine::ProofOfWork, &genesis, &headers),
        Err((5, ConsensusError::InvalidSeal))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn broken_link_is_found(len in 2_usize..12, cut in 1_usize..12) {
        let cut = cut % len;
        let genesis = genesis();
        let mut headers = extend(&genesis, len);
        headers[cut].parent_hash = [0xff; 32];

        let res = validate_header_chain(&ConsensusEngine::Faker, &genesis, &headers);
        prop_assert_eq!(res, Err((cut, ConsensusError::ParentMismatch)));
    }
}
