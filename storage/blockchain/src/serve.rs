//! Answering peers' [`ProtocolRequest`]s from the local chain.

//---------------------------------------------------------------------------------------------------- Import
use cinder_types::{trie, HashOrNumber, Header};
use cinder_wire::{HelperTrieProof, ProtocolRequest, ProtocolResponse};

use crate::{chain::ChainResult, tables::cht_entry_key, BlockChain};

//---------------------------------------------------------------------------------------------------- Constants
/// The maximum amount of headers returned for one request.
pub const MAX_HEADERS_SERVE: usize = 512;
/// The maximum amount of bodies returned for one request.
pub const MAX_BODIES_SERVE: usize = 128;
/// The maximum amount of receipt lists returned for one request.
pub const MAX_RECEIPTS_SERVE: usize = 128;
/// The maximum amount of trie nodes returned for one request.
pub const MAX_NODE_DATA_SERVE: usize = 384;
/// The maximum amount of proofs returned for one request.
pub const MAX_PROOFS_SERVE: usize = 64;

//---------------------------------------------------------------------------------------------------- serve_request
/// Answers `request` from `chain`.
///
/// Lists are answered in order and stop at the first item we do not have, so a
/// response always answers a prefix of the request.
pub fn serve_request(chain: &BlockChain, request: &ProtocolRequest) -> ChainResult<ProtocolResponse> {
    Ok(match request {
        ProtocolRequest::GetBlockHeaders {
            origin,
            amount,
            skip,
            reverse,
        } => ProtocolResponse::BlockHeaders(serve_headers(chain, *origin, *amount, *skip, *reverse)?),
        ProtocolRequest::GetBlockBodies(hashes) => {
            let mut bodies = Vec::new();
            for hash in hashes.iter().take(MAX_BODIES_SERVE) {
                let Some(body) = chain.body(hash)? else {
                    break;
                };
                bodies.push(body);
            }
            ProtocolResponse::BlockBodies(bodies)
        }
        ProtocolRequest::GetReceipts(hashes) => {
            let mut receipts = Vec::new();
            for hash in hashes.iter().take(MAX_RECEIPTS_SERVE) {
                let Some(r) = chain.receipts(hash)? else {
                    break;
                };
                receipts.push(r);
            }
            ProtocolResponse::Receipts(receipts)
        }
        ProtocolRequest::GetNodeData(hashes) => {
            let mut nodes = Vec::new();
            for hash in hashes.iter().take(MAX_NODE_DATA_SERVE) {
                let node = match chain.state_node(hash)? {
                    Some(node) => node,
                    None => match chain.cht_node(hash)? {
                        Some(node) => node,
                        None => break,
                    },
                };
                nodes.push(node);
            }
            ProtocolResponse::NodeData(nodes)
        }
        ProtocolRequest::GetProofs(requests) => {
            let mut proofs = Vec::new();
            for req in requests.iter().take(MAX_PROOFS_SERVE) {
                let Ok(proof) = trie::prove(req.root, &req.key, |hash| {
                    chain.state_node(hash).ok().flatten()
                }) else {
                    break;
                };
                proofs.push(proof);
            }
            ProtocolResponse::Proofs(proofs)
        }
        ProtocolRequest::GetHelperTrieProofs(requests) => {
            let mut proofs = Vec::new();
            for req in requests.iter().take(MAX_PROOFS_SERVE) {
                let Some(root) = chain.cht_root(req.section)? else {
                    break;
                };
                let Ok(proof) = trie::prove(root, &cht_entry_key(req.number), |hash| {
                    chain.cht_node(hash).ok().flatten()
                }) else {
                    break;
                };
                proofs.push(HelperTrieProof {
                    proof,
                    header: chain.header_by_number(req.number)?,
                });
            }
            ProtocolResponse::HelperTrieProofs(proofs)
        }
    })
}

fn serve_headers(
    chain: &BlockChain,
    origin: HashOrNumber,
    amount: u64,
    skip: u64,
    reverse: bool,
) -> ChainResult<Vec<Header>> {
    let amount = usize::try_from(amount).unwrap_or(usize::MAX).min(MAX_HEADERS_SERVE);
    let mut headers = Vec::with_capacity(amount.min(64));

    let first = match origin {
        HashOrNumber::Hash(hash) => chain.header(&hash)?,
        HashOrNumber::Number(number) => chain.header_by_number(number)?,
    };
    let Some(mut current) = first else {
        return Ok(headers);
    };

    // A side chain origin can only be walked by parent links.
    let follow_parents = reverse && skip == 0 && !chain.is_canonical(&current)?;

    while headers.len() < amount {
        let next = if follow_parents {
            chain.header(&current.parent_hash)?
        } else {
            let step = skip.saturating_add(1);
            let number = if reverse {
                current.number.checked_sub(step)
            } else {
                current.number.checked_add(step)
            };
            match number {
                Some(number) => chain.header_by_number(number)?,
                None => None,
            }
        };

        headers.push(current);

        match next {
            Some(next) => current = next,
            None => break,
        }
    }

    Ok(headers)
}
