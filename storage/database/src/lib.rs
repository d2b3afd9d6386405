//! Cinder's key-value store abstraction.
//!
//! Everything the node persists (the chain, the server pool's reputation records,
//! the chain indexer's section metadata) goes through the [`KeyValueStore`] trait.
//!
//! # Backends
//! | Backend         | Description |
//! |-----------------|-------------|
//! | [`MemoryStore`] | A [`BTreeMap`](std::collections::BTreeMap) behind a lock, used in tests and light nodes
//! | [`RedbStore`]   | A single [`redb`] database file, the store the node runs on
//!
//! # Atomicity
//! A [`WriteBatch`] is applied completely or not at all. The [`RedbStore`] commits each
//! batch as one `redb` write transaction, so this holds across crashes.
//!
//! # Example
//! ```rust
//! use cinder_database::{KeyValueStore, MemoryStore, StoreExt, WriteBatch};
//!
//! # fn main() -> Result<(), cinder_database::DbError> {
//! let store = MemoryStore::new();
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"a".to_vec(), b"1".to_vec());
//! batch.put_borsh(b"b".to_vec(), &42_u64);
//! store.write_batch(batch)?;
//!
//! assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
//! assert_eq!(store.get_borsh::<u64>(b"b")?, Some(42));
//! # Ok(()) }
//! ```

mod backend;
mod batch;
pub mod config;
mod error;
mod ext;
mod store;

pub use backend::{MemoryStore, RedbStore};
pub use batch::{BatchOp, WriteBatch};
pub use error::{DbError, DbResult};
pub use ext::StoreExt;
pub use store::KeyValueStore;
