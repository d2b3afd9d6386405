//! Atomic batches of writes.

//---------------------------------------------------------------------------------------------------- Import
use borsh::BorshSerialize;

//---------------------------------------------------------------------------------------------------- BatchOp
/// A single write in a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

//---------------------------------------------------------------------------------------------------- WriteBatch
/// A list of writes applied atomically with [`KeyValueStore::write_batch`](crate::KeyValueStore::write_batch).
///
/// Writes are applied in order, a later write to the same key wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Encodes `value` with [`borsh`] and adds a put for it.
    pub fn put_borsh<T: BorshSerialize + ?Sized>(&mut self, key: Vec<u8>, value: &T) {
        let value = borsh::to_vec(value).expect("serializing to a vec can not fail");
        self.put(key, value);
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Appends every write in `other` after the writes in `self`.
    pub fn extend(&mut self, other: Self) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
