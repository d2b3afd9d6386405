//! The key-value store capability; `trait KeyValueStore`.

use crate::{DbResult, WriteBatch};

/// A key-value store.
///
/// Keys and values are opaque bytes, all key layouts are defined by the users of the store.
///
/// Implementations must be safe to share between threads, every write goes through
/// [`KeyValueStore::write_batch`] and must be atomic.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Applies every write in `batch` atomically.
    fn write_batch(&self, batch: WriteBatch) -> DbResult<()>;

    /// Returns every `(key, value)` pair whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns `true` if `key` has a value.
    fn contains(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stores `value` under `key`.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> DbResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_batch(batch)
    }

    /// Removes `key`, removing a key that does not exist is not an error.
    fn delete(&self, key: Vec<u8>) -> DbResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_batch(batch)
    }

    /// Flushes any buffered writes to durable storage.
    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}
