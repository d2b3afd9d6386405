//! Implementation of [`KeyValueStore`] for `redb`.

//---------------------------------------------------------------------------------------------------- Import
use redb::{ReadableTable, TableDefinition};

use crate::{
    config::{Config, FlushMode},
    BatchOp, DbResult, KeyValueStore, WriteBatch,
};

//---------------------------------------------------------------------------------------------------- Constants
/// The table every key lives in, key layouts are defined by the users of the store.
const KV_TABLE: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("kv");

//---------------------------------------------------------------------------------------------------- RedbStore
/// A [`KeyValueStore`] backed by a `redb` database file.
pub struct RedbStore {
    /// The actual database environment.
    env: redb::Database,

    /// The configuration we were opened with.
    config: Config,

    /// `redb` sets durability per write transaction,
    /// every [`KeyValueStore::write_batch`] uses this one.
    durability: redb::Durability,
}

impl Drop for RedbStore {
    fn drop(&mut self) {
        // INVARIANT: drop(RedbStore) must sync.
        if let Err(e) = self.flush() {
            tracing::warn!("database sync error: {e}");
        }
    }
}

impl RedbStore {
    /// Open (or create) the store described by `config`.
    ///
    /// # Errors
    /// Returns an error if the database file could not be opened or is corrupt.
    #[cold]
    #[inline(never)] // called once.
    pub fn open(config: Config) -> DbResult<Self> {
        let durability = match config.flush_mode {
            FlushMode::Safe => redb::Durability::Immediate,
            FlushMode::Fast => redb::Durability::Eventual,
        };

        std::fs::create_dir_all(config.db_directory())?;

        let db_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.db_file())?;

        let mut env = redb::Builder::new().create_file(db_file)?;

        if !env.check_integrity()? {
            tracing::warn!("database failed its integrity check and was repaired");
        }

        // Read transactions can only open tables that exist.
        let tx_rw = env.begin_write()?;
        drop(tx_rw.open_table(KV_TABLE)?);
        tx_rw.commit()?;

        Ok(Self {
            env,
            config,
            durability,
        })
    }

    /// Return the [`Config`] this store was opened with.
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let tx_ro = self.env.begin_read()?;
        let table = tx_ro.open_table(KV_TABLE)?;

        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx_rw = self.env.begin_write()?;
        tx_rw.set_durability(self.durability);

        {
            let mut table = tx_rw.open_table(KV_TABLE)?;
            for op in batch {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }

        // Nothing is visible until this commits, so a failed batch leaves no trace.
        tx_rw.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tx_ro = self.env.begin_read()?;
        let table = tx_ro.open_table(KV_TABLE)?;

        let mut pairs = Vec::new();
        for entry in table.range::<&[u8]>(prefix..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix) {
                break;
            }
            pairs.push((key.value().to_vec(), value.value().to_vec()));
        }

        Ok(pairs)
    }

    fn flush(&self) -> DbResult<()> {
        // `redb`'s syncs are tied to write transactions,
        // so create one, don't do anything and commit.
        let mut tx_rw = self.env.begin_write()?;
        tx_rw.set_durability(redb::Durability::Immediate);
        tx_rw.set_two_phase_commit(true);
        tx_rw.commit()?;
        Ok(())
    }
}
