//! Tests run against every backend.

//---------------------------------------------------------------------------------------------------- Import
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::{
    config::{Config, ConfigBuilder, FlushMode},
    KeyValueStore, MemoryStore, RedbStore, StoreExt, WriteBatch,
};

//---------------------------------------------------------------------------------------------------- Tests
fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get(b"a").unwrap(), None);

    let mut batch = WriteBatch::new();
    batch.put(b"a/1".to_vec(), b"one".to_vec());
    batch.put(b"a/2".to_vec(), b"two".to_vec());
    batch.put(b"b/1".to_vec(), b"three".to_vec());
    batch.delete(b"a/2".to_vec());
    batch.put(b"a/3".to_vec(), b"four".to_vec());
    store.write_batch(batch).unwrap();

    assert_eq!(store.get(b"a/2").unwrap(), None);
    assert!(store.contains(b"b/1").unwrap());
    assert_eq!(
        store.scan_prefix(b"a/").unwrap(),
        vec![
            (b"a/1".to_vec(), b"one".to_vec()),
            (b"a/3".to_vec(), b"four".to_vec()),
        ]
    );

    store.delete(b"a/1".to_vec()).unwrap();
    store.delete(b"missing".to_vec()).unwrap();
    assert_eq!(store.scan_prefix(b"a/").unwrap().len(), 1);

    // Prefix scans stop at the last key sharing the prefix, even at the top of the byte range.
    store.put(vec![0xff, 0xff], vec![1]).unwrap();
    store.put(vec![0xff, 0xff, 0], vec![2]).unwrap();
    store.put(vec![0xff], vec![3]).unwrap();
    assert_eq!(
        store.scan_prefix(&[0xff, 0xff]).unwrap(),
        vec![(vec![0xff, 0xff], vec![1]), (vec![0xff, 0xff, 0], vec![2])]
    );
}

fn tmp_config(dir: &tempfile::TempDir, flush_mode: FlushMode) -> Config {
    ConfigBuilder::new(dir.path().to_path_buf())
        .flush_mode(flush_mode)
        .build()
}

#[test]
fn memory() {
    exercise(&MemoryStore::new());
}

#[test]
fn redb() {
    let tmp = tempfile::tempdir().unwrap();
    exercise(&RedbStore::open(tmp_config(&tmp, FlushMode::Fast)).unwrap());
}

#[test]
fn redb_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp_config(&tmp, FlushMode::Safe);

    {
        let store = RedbStore::open(config.clone()).unwrap();
        assert_eq!(store.config(), &config);
        store.put_borsh(b"height".to_vec(), &100_u64).unwrap();
        store.put_borsh(b"height".to_vec(), &101_u64).unwrap();
    }

    let store = RedbStore::open(config.clone()).unwrap();
    assert_eq!(store.get_borsh::<u64>(b"height").unwrap(), Some(101));
    assert!(config.db_file().exists());
}

#[test]
fn fast_batches_are_synced_on_drop() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp_config(&tmp, FlushMode::Fast);

    {
        let store = RedbStore::open(config.clone()).unwrap();
        for i in 0..64_u64 {
            store.put_borsh(i.to_be_bytes().to_vec(), &i).unwrap();
        }
        store.delete(0_u64.to_be_bytes().to_vec()).unwrap();
    }

    let store = RedbStore::open(config).unwrap();
    assert_eq!(store.scan_prefix(b"").unwrap().len(), 63);
    assert_eq!(
        store.get_borsh::<u64>(&63_u64.to_be_bytes()).unwrap(),
        Some(63)
    );
}

#[test]
fn empty_batches_are_no_ops() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RedbStore::open(tmp_config(&tmp, FlushMode::Safe)).unwrap();

    store.write_batch(WriteBatch::new()).unwrap();
    assert_eq!(store.scan_prefix(b"").unwrap(), vec![]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A reopened [`RedbStore`] holds what a [`MemoryStore`] given the same writes holds.
    #[test]
    fn redb_store_matches_memory_store(
        ops in proptest::collection::vec((any::<bool>(), 0_u8..8, proptest::collection::vec(any::<u8>(), 0..16)), 0..64),
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp_config(&tmp, FlushMode::Fast);
        let memory = MemoryStore::new();

        {
            let redb = RedbStore::open(config.clone()).unwrap();
            for chunk in ops.chunks(4) {
                let mut batch = WriteBatch::new();
                for (put, key, value) in chunk {
                    if *put {
                        batch.put(vec![*key], value.clone());
                    } else {
                        batch.delete(vec![*key]);
                    }
                }
                redb.write_batch(batch.clone()).unwrap();
                memory.write_batch(batch).unwrap();
            }
        }

        let redb = RedbStore::open(config).unwrap();
        let stored = redb.scan_prefix(b"").unwrap();
        prop_assert_eq!(stored, memory.scan_prefix(b"").unwrap());
    }
}
