//! # Cinder Light
//!
//! On-demand retrieval (ODR) for light clients.
//!
//! A light client keeps the header chain and nothing else. When it needs state, a block
//! body, receipts or a header it does not have, the [`OnDemandRetriever`] asks a serving
//! peer for it and checks the answer against data it already trusts:
//!
//! | Lookup                                              | Checked against |
//! |-----------------------------------------------------|-----------------|
//! | [`get_trie_node`](OnDemandRetriever::get_trie_node) | a state root, with a trie proof
//! | [`get_node_data`](OnDemandRetriever::get_node_data) | the node's hash
//! | [`get_block_body`](OnDemandRetriever::get_block_body) | the header's transactions root
//! | [`get_receipts`](OnDemandRetriever::get_receipts)   | the header's receipts root
//! | [`get_header_by_number`](OnDemandRetriever::get_header_by_number) | a stored CHT root, with a trie proof
//!
//! Verified answers are stored, so the same lookup is local the next time.

mod error;
mod odr;

pub use error::OdrError;
pub use odr::{OdrConfig, OnDemandRetriever};
