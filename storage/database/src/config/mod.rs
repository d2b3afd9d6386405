//! [`RedbStore`](crate::RedbStore) configuration.
//!
//! The main constructor is the [`ConfigBuilder`].
//!
//! # Example
//! ```rust
//! use cinder_database::{
//!     RedbStore,
//!     config::{ConfigBuilder, FlushMode},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_dir = tempfile::tempdir()?;
//!
//! let config = ConfigBuilder::new(db_dir.path().to_path_buf())
//!     // Do not fsync every batch.
//!     .flush_mode(FlushMode::Fast)
//!     .build();
//!
//! let store = RedbStore::open(config.clone())?;
//! assert_eq!(store.config(), &config);
//! # Ok(()) }
//! ```

//---------------------------------------------------------------------------------------------------- Import
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

//---------------------------------------------------------------------------------------------------- Constants
/// The file name of the database inside [`Config::db_directory`].
pub const DATABASE_DATA_FILENAME: &str = "data.redb";

//---------------------------------------------------------------------------------------------------- FlushMode
/// Disk synchronization mode.
///
/// Regardless of the variant chosen, dropping the [`RedbStore`](crate::RedbStore)
/// will always flush to disk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FlushMode {
    /// Every write batch is durable once it returns.
    #[default]
    Safe,

    /// Batches are committed without an `fsync`, a crash may lose the latest
    /// batches but never leaves a partially applied one.
    Fast,
}

//---------------------------------------------------------------------------------------------------- ConfigBuilder
/// Builder for [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBuilder {
    db_directory: PathBuf,
    flush_mode: Option<FlushMode>,
}

impl ConfigBuilder {
    /// Create a new [`ConfigBuilder`].
    ///
    /// [`ConfigBuilder::build`] can be called immediately
    /// after this function to use default values.
    pub const fn new(db_directory: PathBuf) -> Self {
        Self {
            db_directory,
            flush_mode: None,
        }
    }

    /// Build into a [`Config`].
    pub fn build(self) -> Config {
        let db_file = self.db_directory.join(DATABASE_DATA_FILENAME);

        Config {
            db_directory: self.db_directory,
            db_file,
            flush_mode: self.flush_mode.unwrap_or_default(),
        }
    }

    /// Set a custom [`FlushMode`].
    #[must_use]
    pub const fn flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = Some(flush_mode);
        self
    }
}

//---------------------------------------------------------------------------------------------------- Config
/// [`RedbStore`](crate::RedbStore) configuration.
///
/// For construction, use [`ConfigBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// The directory used to store all database files.
    pub(crate) db_directory: PathBuf,
    /// The database file, created from `db_directory`.
    pub(crate) db_file: PathBuf,

    /// Disk synchronization mode.
    pub flush_mode: FlushMode,
}

impl Config {
    /// Create a new [`Config`] with default settings.
    pub fn new(db_directory: PathBuf) -> Self {
        ConfigBuilder::new(db_directory).build()
    }

    /// Return the [`Path`] to the database directory.
    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    /// Return the [`Path`] to the database file.
    pub fn db_file(&self) -> &Path {
        &self.db_file
    }
}
