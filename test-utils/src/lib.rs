//! Cinder testing utilities.
//!
//! - [`chain`] generates deterministic chains, with real state, receipts and logs
//!   produced by the [`KvExecutor`](cinder_blockchain::KvExecutor).
//! - [`peer`] handshakes a [`Client`](cinder_p2p_core::client::Client) with a remote
//!   end the test drives by hand.
//! - [`mock`] connects to in-memory peers that serve a chain over the real wire
//!   protocol, with request counters and fault injection.

pub mod chain;
pub mod mock;
pub mod peer;

/// The network id every test node uses.
pub const TEST_NETWORK_ID: u64 = 0xc1d3;
