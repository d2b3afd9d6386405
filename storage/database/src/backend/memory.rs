//! In-memory backend.

//---------------------------------------------------------------------------------------------------- Import
use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use crate::{BatchOp, DbResult, KeyValueStore, WriteBatch};

//---------------------------------------------------------------------------------------------------- MemoryStore
/// A [`KeyValueStore`] that lives only in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The amount of keys stored.
    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies `batch` to `map`.
fn apply(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: WriteBatch) {
    for op in batch {
        match op {
            BatchOp::Put { key, value } => {
                map.insert(key, value);
            }
            BatchOp::Delete { key } => {
                map.remove(&key);
            }
        }
    }
}

/// Returns every pair in `map` whose key starts with `prefix`.
fn scan(map: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self
            .map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
        apply(
            &mut self.map.write().unwrap_or_else(PoisonError::into_inner),
            batch,
        );
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan(
            &self.map.read().unwrap_or_else(PoisonError::into_inner),
            prefix,
        ))
    }
}
