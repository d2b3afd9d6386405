//! The on-demand retriever; `struct OnDemandRetriever`.

//---------------------------------------------------------------------------------------------------- Import
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use cinder_blockchain::{tables::cht_entry_key, BlockChain, ChainError};
use cinder_chain_indexer::{ChtEntry, CHT_SECTION_SIZE};
use cinder_p2p::{InvalidResponse, RequestCriteria, RetrieveManager, RetrieveRequest};
use cinder_types::{
    trie::{self, node_hash, TrieError},
    BlockBody, Hash, Header, Receipt,
};
use cinder_wire::{HelperTrieRequest, ProofRequest, ProtocolRequest, ProtocolResponse};

use crate::OdrError;

//---------------------------------------------------------------------------------------------------- OdrConfig
/// The [`OnDemandRetriever`] config.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OdrConfig {
    /// The section size of the CHT roots header proofs are checked against.
    pub cht_section_size: u64,
}

impl Default for OdrConfig {
    fn default() -> Self {
        Self {
            cht_section_size: CHT_SECTION_SIZE,
        }
    }
}

//---------------------------------------------------------------------------------------------------- OnDemandRetriever
/// Fetches the data a light client does not store from light-serving peers.
///
/// Every lookup is answered locally if it can be. Otherwise exactly one request goes
/// through the [`RetrieveManager`], so identical lookups running at the same time share
/// it. Answers are checked against a header or root we already trust before they are
/// stored and returned.
#[derive(Clone)]
pub struct OnDemandRetriever {
    chain: Arc<BlockChain>,
    retriever: RetrieveManager,
    config: OdrConfig,
}

impl OnDemandRetriever {
    pub const fn new(chain: Arc<BlockChain>, retriever: RetrieveManager, config: OdrConfig) -> Self {
        Self {
            chain,
            retriever,
            config,
        }
    }

    pub const fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    /// Reads `key` from the state trie with root `root`, [`None`] if the trie does not
    /// hold it.
    ///
    /// The proof nodes are stored, so the path to `key` is local afterwards.
    ///
    /// # Errors
    /// Fails if the retrieval failed or was cancelled.
    #[instrument(level = "debug", skip_all, fields(root = hex::encode(&root[..8])))]
    pub async fn get_trie_node(
        &self,
        root: Hash,
        key: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, OdrError> {
        match self.chain.state_value(root, key) {
            Ok(value) => return Ok(value),
            Err(ChainError::Trie(TrieError::MissingNode(_))) => (),
            Err(e) => return Err(e.into()),
        }

        let proof_key = key.to_vec();
        let req = RetrieveRequest::new(
            ProtocolRequest::GetProofs(vec![ProofRequest {
                root,
                key: key.to_vec(),
            }]),
            RequestCriteria::light_server(),
            move |response| {
                let ProtocolResponse::Proofs(proofs) = response else {
                    return Err(InvalidResponse("expected proofs"));
                };
                let [proof] = proofs.as_slice() else {
                    return Err(InvalidResponse("expected one proof"));
                };
                trie::verify_proof(root, &proof_key, proof)
                    .map(drop)
                    .map_err(|_| InvalidResponse("state proof does not verify"))
            },
        );

        let response = self.retriever.retrieve(req, cancel).await?.response;
        let ProtocolResponse::Proofs(mut proofs) = response else {
            unreachable!("the validator only accepts proofs");
        };
        let proof = proofs.pop().expect("the validator only accepts one proof");

        let value = trie::verify_proof(root, key, &proof)?;
        self.chain.write_state_nodes(proof)?;

        Ok(value)
    }

    /// Returns the trie node with hash `hash`.
    ///
    /// # Errors
    /// Fails if the retrieval failed or was cancelled.
    #[instrument(level = "debug", skip_all, fields(hash = hex::encode(&hash[..8])))]
    pub async fn get_node_data(
        &self,
        hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, OdrError> {
        if let Some(node) = self.chain.state_node(&hash)? {
            return Ok(node);
        }

        let req = RetrieveRequest::new(
            ProtocolRequest::GetNodeData(vec![hash]),
            RequestCriteria::full_server(),
            move |response| {
                let ProtocolResponse::NodeData(nodes) = response else {
                    return Err(InvalidResponse("expected node data"));
                };
                match nodes.as_slice() {
                    [node] if node_hash(node) == hash => Ok(()),
                    [_] => Err(InvalidResponse("node does not match its hash")),
                    _ => Err(InvalidResponse("expected one node")),
                }
            },
        );

        let response = self.retriever.retrieve(req, cancel).await?.response;
        let ProtocolResponse::NodeData(mut nodes) = response else {
            unreachable!("the validator only accepts node data");
        };
        let node = nodes.pop().expect("the validator only accepts one node");

        self.chain.write_state_nodes([node.clone()])?;
        Ok(node)
    }

    /// Returns the body of the block with hash `hash`, its header must be stored.
    ///
    /// # Errors
    /// Fails if the header is unknown, or the retrieval failed or was cancelled.
    #[instrument(level = "debug", skip_all, fields(hash = hex::encode(&hash[..8])))]
    pub async fn get_block_body(
        &self,
        hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<BlockBody, OdrError> {
        let header = self.trusted_header(&hash)?;
        if header.has_empty_body() {
            return Ok(BlockBody::default());
        }
        if let Some(body) = self.chain.body(&hash)? {
            return Ok(body);
        }

        let tx_root = header.tx_root;
        let req = RetrieveRequest::new(
            ProtocolRequest::GetBlockBodies(vec![hash]),
            RequestCriteria::full_server().with_min_number(header.number),
            move |response| {
                let ProtocolResponse::BlockBodies(bodies) = response else {
                    return Err(InvalidResponse("expected bodies"));
                };
                match bodies.as_slice() {
                    [body] if body.tx_root() == tx_root => Ok(()),
                    [_] => Err(InvalidResponse("body does not match its header")),
                    _ => Err(InvalidResponse("expected one body")),
                }
            },
        );

        let response = self.retriever.retrieve(req, cancel).await?.response;
        let ProtocolResponse::BlockBodies(mut bodies) = response else {
            unreachable!("the validator only accepts bodies");
        };
        let body = bodies.pop().expect("the validator only accepts one body");

        self.chain.write_body(&hash, &body)?;
        Ok(body)
    }

    /// Returns the receipts of the block with hash `hash`, its header must be stored.
    ///
    /// # Errors
    /// Fails if the header is unknown, or the retrieval failed or was cancelled.
    #[instrument(level = "debug", skip_all, fields(hash = hex::encode(&hash[..8])))]
    pub async fn get_receipts(
        &self,
        hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<Vec<Receipt>, OdrError> {
        let header = self.trusted_header(&hash)?;
        if header.has_empty_receipts() {
            return Ok(Vec::new());
        }
        if let Some(receipts) = self.chain.receipts(&hash)? {
            return Ok(receipts);
        }

        let receipts_root = header.receipts_root;
        let req = RetrieveRequest::new(
            ProtocolRequest::GetReceipts(vec![hash]),
            RequestCriteria::full_server().with_min_number(header.number),
            move |response| {
                let ProtocolResponse::Receipts(lists) = response else {
                    return Err(InvalidResponse("expected receipts"));
                };
                match lists.as_slice() {
                    [receipts] if Receipt::root(receipts) == receipts_root => Ok(()),
                    [_] => Err(InvalidResponse("receipts do not match their header")),
                    _ => Err(InvalidResponse("expected one receipt list")),
                }
            },
        );

        let response = self.retriever.retrieve(req, cancel).await?.response;
        let ProtocolResponse::Receipts(mut lists) = response else {
            unreachable!("the validator only accepts receipts");
        };
        let receipts = lists.pop().expect("the validator only accepts one receipt list");

        self.chain.write_receipts(&hash, &receipts)?;
        Ok(receipts)
    }

    /// Returns the canonical header at `number`.
    ///
    /// A header we do not have is proven against the stored CHT root of the section
    /// covering `number`, and then stored by hash.
    ///
    /// # Errors
    /// Fails if no CHT root covers `number`, or the retrieval failed or was cancelled.
    #[instrument(level = "debug", skip_all, fields(number))]
    pub async fn get_header_by_number(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Header, OdrError> {
        if let Some(header) = self.chain.header_by_number(number)? {
            return Ok(header);
        }

        let section = number
            .checked_div(self.config.cht_section_size)
            .ok_or(OdrError::NotIndexed { number })?;
        let root = self
            .chain
            .cht_root(section)?
            .ok_or(OdrError::NotIndexed { number })?;

        let req = RetrieveRequest::new(
            ProtocolRequest::GetHelperTrieProofs(vec![HelperTrieRequest { section, number }]),
            RequestCriteria::light_server(),
            move |response| {
                let ProtocolResponse::HelperTrieProofs(proofs) = response else {
                    return Err(InvalidResponse("expected helper trie proofs"));
                };
                let [proof] = proofs.as_slice() else {
                    return Err(InvalidResponse("expected one helper trie proof"));
                };
                let Some(header) = &proof.header else {
                    return Err(InvalidResponse("missing header"));
                };

                let entry = trie::verify_proof(root, &cht_entry_key(number), &proof.proof)
                    .ok()
                    .flatten()
                    .and_then(|value| ChtEntry::decode(&value))
                    .ok_or(InvalidResponse("CHT proof does not verify"))?;

                if header.number != number || header.hash() != entry.hash {
                    return Err(InvalidResponse("header does not match the CHT"));
                }
                Ok(())
            },
        );

        let response = self.retriever.retrieve(req, cancel).await?.response;
        let ProtocolResponse::HelperTrieProofs(mut proofs) = response else {
            unreachable!("the validator only accepts helper trie proofs");
        };
        let header = proofs
            .pop()
            .and_then(|proof| proof.header)
            .expect("the validator only accepts one proof with a header");

        self.chain.write_detached_header(&header)?;
        Ok(header)
    }

    fn trusted_header(&self, hash: &Hash) -> Result<Header, OdrError> {
        self.chain
            .header(hash)?
            .ok_or(OdrError::UnknownBlock(*hash))
    }
}
