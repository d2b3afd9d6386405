//! [`borsh`] helpers on top of [`KeyValueStore`].

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{DbError, DbResult, KeyValueStore, WriteBatch};

/// Typed access to a [`KeyValueStore`], values are encoded with [`borsh`].
pub trait StoreExt: KeyValueStore {
    /// Returns the value under `key` decoded as `T`.
    fn get_borsh<T: BorshDeserialize>(&self, key: &[u8]) -> DbResult<Option<T>> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };

        T::try_from_slice(&bytes)
            .map(Some)
            .map_err(|_| DbError::Decode {
                key: String::from_utf8_lossy(key).into_owned(),
            })
    }

    /// Stores `value` encoded with [`borsh`] under `key`.
    fn put_borsh<T: BorshSerialize + ?Sized>(&self, key: Vec<u8>, value: &T) -> DbResult<()> {
        let mut batch = WriteBatch::new();
        batch.put_borsh(key, value);
        self.write_batch(batch)
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}
