//! Cinder's local chain.
//!
//! [`BlockChain`] stores headers, bodies, receipts and state in a
//! [`KeyValueStore`](cinder_database::KeyValueStore), see [`tables`] for the layout.
//!
//! Reads are plain functions on [`BlockChain`]. Writes go through the [`ChainWriter`]
//! returned by [`BlockChain::writer`], there is only ever one. Whenever a head moves
//! a [`ChainEvent`](cinder_types::ChainEvent) is broadcast to [`BlockChain::subscribe`]rs.
//!
//! [`serve_request`] answers peers' requests from the chain.

mod chain;
mod error;
mod executor;
mod genesis;
mod serve;
pub mod tables;
mod writer;

pub use chain::{BlockChain, ChainResult, ChtRoot, EVENT_CHANNEL_CAPACITY};
pub use error::ChainError;
pub use executor::{Execution, ExecutionError, KvExecutor, KvOp, StateDb, StateExecutor};
pub use genesis::Genesis;
pub use serve::{
    serve_request, MAX_BODIES_SERVE, MAX_HEADERS_SERVE, MAX_NODE_DATA_SERVE, MAX_PROOFS_SERVE,
    MAX_RECEIPTS_SERVE,
};
pub use writer::ChainWriter;
