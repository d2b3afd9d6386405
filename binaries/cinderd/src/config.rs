//! cinderd config
use std::{fmt, fs::read_to_string, path::Path, str::FromStr};

use clap::Parser;
use serde::{Deserialize, Serialize};

use cinder_database::config::ConfigBuilder;
use cinder_helper::{
    fs::{database_path, CINDER_CONFIG_DIR, DEFAULT_CONFIG_FILE_NAME},
    network::Network,
};
use cinder_light::OdrConfig;
use cinder_types::SyncMode;

use crate::{
    constants::{DEFAULT_CONFIG_STARTUP_DELAY, DEFAULT_CONFIG_WARNING},
    logging::eprintln_red,
};

mod args;
mod consensus;
mod fs;
mod p2p;
mod storage;
mod tracing_config;

#[macro_use]
mod macros;

use consensus::ConsensusConfig;
use fs::FileSystemConfig;
use p2p::P2PConfig;
use storage::StorageConfig;
use tracing_config::TracingConfig;

/// Header to put at the start of the generated config file.
const HEADER: &str = r"##        _           _
##    ___(_)_ __   __| | ___ _ __
##   / __| | '_ \ / _` |/ _ \ '__|
##  | (__| | | | | (_| |  __/ |
##   \___|_|_| |_|\__,_|\___|_|
##
## All these config values can be set to
## their default by commenting them out with '#'.
##
## Some values are already commented out,
## to set the value remove the '#' at the start of the line.

";

/// Reads the args & config file, returning a [`Config`].
pub fn read_config_and_args() -> Config {
    let args = args::Args::parse();
    args.do_quick_requests();

    let config: Config = if let Some(config_file) = &args.config_file {
        // If a config file was set in the args try to read it and exit if we can't.
        match Config::read_from_path(config_file) {
            Ok(config) => config,
            Err(e) => {
                eprintln_red(&format!("Failed to read config from file: {e}"));
                std::process::exit(1);
            }
        }
    } else {
        // First attempt to read the config file from the current directory.
        std::env::current_dir()
            .map(|path| path.join(DEFAULT_CONFIG_FILE_NAME))
            .map_err(Into::into)
            .and_then(Config::read_from_path)
            .inspect_err(|e| tracing::debug!("Failed to read config from current dir: {e}"))
            // otherwise try the main config directory.
            .or_else(|_| {
                let file = CINDER_CONFIG_DIR.join(DEFAULT_CONFIG_FILE_NAME);
                Config::read_from_path(file)
            })
            .inspect_err(|e| {
                tracing::debug!("Failed to read config from config dir: {e}");
                if !args.skip_config_warning {
                    eprintln_red(DEFAULT_CONFIG_WARNING);
                    std::thread::sleep(DEFAULT_CONFIG_STARTUP_DELAY);
                }
            })
            .unwrap_or_default()
    };

    args.apply_args(config)
}

config_struct! {
    /// The config for all of cinderd.
    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(deny_unknown_fields, default)]
    pub struct Config {
        /// The network cinderd should run on.
        ///
        /// Valid values | "Mainnet", "Testnet", "Devnet"
        pub network: Network,

        /// How the chain is synced.
        ///
        /// "Full" downloads and executes every block.
        /// "Fast" downloads every block and the state at a recent
        /// block, then executes the blocks after it.
        /// "Light" downloads headers only and fetches the rest
        /// from peers when it is needed.
        ///
        /// Valid values | "Full", "Fast", "Light"
        pub sync_mode: SyncMode,

        #[child = true]
        /// Configuration for block validation.
        pub consensus: ConsensusConfig,

        #[child = true]
        /// Configuration for cinderd's logging system, tracing.
        ///
        /// Tracing is used for logging to stdout and files.
        pub tracing: TracingConfig,

        #[child = true]
        /// Configuration for cinderd's P2P system.
        pub p2p: P2PConfig,

        #[child = true]
        /// Configuration for persistent data storage.
        pub storage: StorageConfig,

        #[child = true]
        /// Configuration for the file-system.
        pub fs: FileSystemConfig,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::default(),
            sync_mode: SyncMode::Full,
            consensus: ConsensusConfig::default(),
            tracing: TracingConfig::default(),
            p2p: P2PConfig::default(),
            storage: StorageConfig::default(),
            fs: FileSystemConfig::default(),
        }
    }
}

impl Config {
    /// Returns a default [`Config`], with doc comments.
    pub fn documented_config() -> String {
        let str = toml::ser::to_string_pretty(&Self::default())
            .expect("the default config serializes");
        let mut doc =
            toml_edit::DocumentMut::from_str(&str).expect("serialized toml is valid toml");
        Self::write_docs(doc.as_table_mut());
        format!("{HEADER}{doc}")
    }

    /// Attempts to read a config file in [`toml`] format from the given [`Path`].
    ///
    /// # Errors
    ///
    /// Will return an [`Err`] if the file cannot be read or if the file is not a valid [`toml`] config.
    fn read_from_path(file: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let file_text = read_to_string(file.as_ref())?;

        Ok(toml::from_str(&file_text)
            .inspect(|_| println!("Using config at: {}", file.as_ref().to_string_lossy()))
            .inspect_err(|e| {
                eprintln_red(&format!(
                    "Failed to parse config file at: {}",
                    file.as_ref().to_string_lossy()
                ));
                eprintln_red(&format!("{e}"));
                std::process::exit(1);
            })?)
    }

    /// Returns the current [`Network`] we are running on.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The [`cinder_database`] config of the chain store.
    pub fn database_config(&self) -> cinder_database::config::Config {
        ConfigBuilder::new(database_path(&self.fs.data_directory, self.network))
            .flush_mode(self.storage.flush_mode)
            .build()
    }

    /// The [`cinder_p2p::P2PConfig`].
    pub fn p2p_config(&self) -> cinder_p2p::P2PConfig {
        self.p2p.p2p_config(self.sync_mode)
    }

    /// The [`OdrConfig`], only used in [`SyncMode::Light`].
    pub const fn odr_config(&self) -> OdrConfig {
        OdrConfig {
            cht_section_size: self.storage.indexer.cht_section_size,
        }
    }

    pub const fn bloom_indexer_config(&self) -> cinder_chain_indexer::ChainIndexerConfig {
        self.storage.indexer.bloom()
    }

    pub const fn cht_indexer_config(&self) -> cinder_chain_indexer::ChainIndexerConfig {
        self.storage.indexer.cht()
    }

    /// The consensus engine chosen for [`Config::network`].
    ///
    /// # Errors
    /// Fails if the configured engine is invalid, see [`ConsensusConfig::engine`].
    pub fn consensus_engine(&self) -> anyhow::Result<cinder_consensus::ConsensusEngine> {
        self.consensus.engine(self.network)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "========== CONFIGURATION ==========\n{self:#?}\n==================================="
        )
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use toml::from_str;

    use super::*;

    #[test]
    fn documented_config() {
        let str = Config::documented_config();
        let conf: Config = from_str(&str).unwrap();

        assert_eq!(conf, Config::default());
    }

    #[test]
    fn documented_config_carries_field_docs() {
        let str = Config::documented_config();

        assert!(str.starts_with(HEADER));
        assert!(str.contains("## How the chain is synced."));
        assert!(str.contains("## Retries after the first attempt of a request."));
        // Commented out fields still show their default.
        assert!(str.contains("#flush_mode = \"Safe\""));
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "sync_mode = \"Light\"\n\n[p2p.retrieve]\nmax_retries = 5\n\n[storage.indexer]\ncht_section_size = 64"
        )
        .unwrap();

        let config = Config::read_from_path(file.path()).unwrap();

        assert_eq!(config.sync_mode, SyncMode::Light);
        assert_eq!(config.p2p.retrieve.max_retries, 5);
        assert_eq!(
            config.p2p.retrieve.request_timeout,
            cinder_p2p::constants::DEFAULT_REQUEST_TIMEOUT
        );
        assert_eq!(config.odr_config().cht_section_size, 64);
        assert_eq!(config.p2p_config().downloader.mode, SyncMode::Light);
        assert_eq!(config.network(), Network::Mainnet);
    }

    #[test]
    fn database_lives_under_the_network_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.fs.data_directory = dir.path().to_path_buf();
        config.network = Network::Testnet;

        let db = config.database_config();

        assert_eq!(db.db_directory(), dir.path().join("testnet").join("chain"));
    }
}
