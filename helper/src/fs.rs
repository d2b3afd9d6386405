//! Cinder directories and filenames.

//---------------------------------------------------------------------------------------------------- Use
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use crate::network::Network;

//---------------------------------------------------------------------------------------------------- Const
/// Cinder's main directory name.
///
/// This is `Cinder` on `Windows|macOS` and `cinder` on everything else.
pub const CINDER_DIR: &str = {
    if cfg!(target_os = "windows") || cfg!(target_os = "macos") {
        "Cinder"
    } else {
        "cinder"
    }
};

/// The default name of the `cinderd` config file.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "Cinder.toml";

//---------------------------------------------------------------------------------------------------- Directories
/// Create a `LazyLock` for a common PATH used by Cinder.
///
/// If the OS directory can not be found the current directory is used instead.
macro_rules! impl_path_lazylock {
    ($(
        $(#[$attr:meta])*
        $name:ident,
        $dirs_fn:ident
    ),* $(,)?) => {$(
        $(#[$attr])*
        pub static $name: LazyLock<PathBuf> = LazyLock::new(|| {
            let mut path = dirs::$dirs_fn().unwrap_or_else(|| PathBuf::from("."));
            path.push(CINDER_DIR);
            path
        });
    )*};
}

impl_path_lazylock! {
    /// Cinder's cache directory.
    ///
    /// | OS      | PATH                                   |
    /// |---------|----------------------------------------|
    /// | Windows | `C:\Users\Alice\AppData\Local\Cinder\` |
    /// | macOS   | `/Users/Alice/Library/Caches/Cinder/`  |
    /// | Linux   | `/home/alice/.cache/cinder/`           |
    CINDER_CACHE_DIR,
    cache_dir,

    /// Cinder's config directory.
    ///
    /// | OS      | PATH                                               |
    /// |---------|----------------------------------------------------|
    /// | Windows | `C:\Users\Alice\AppData\Roaming\Cinder\`           |
    /// | macOS   | `/Users/Alice/Library/Application Support/Cinder/` |
    /// | Linux   | `/home/alice/.config/cinder/`                      |
    CINDER_CONFIG_DIR,
    config_dir,

    /// Cinder's data directory.
    ///
    /// | OS      | PATH                                               |
    /// |---------|----------------------------------------------------|
    /// | Windows | `C:\Users\Alice\AppData\Roaming\Cinder\`           |
    /// | macOS   | `/Users/Alice/Library/Application Support/Cinder/` |
    /// | Linux   | `/home/alice/.local/share/cinder/`                 |
    CINDER_DATA_DIR,
    data_dir,
}

/// Joins the [`Network`] to the [`Path`] provided.
///
/// Mainnet data lives directly in `path`, other networks get a sub-directory.
pub fn path_with_network(path: &Path, network: Network) -> PathBuf {
    match network {
        Network::Mainnet => path.to_path_buf(),
        Network::Testnet | Network::Devnet => path.join(network.to_string()),
    }
}

/// The directory the chain database is kept in.
pub fn database_path(data_dir: &Path, network: Network) -> PathBuf {
    path_with_network(data_dir, network).join("chain")
}

/// The directory log files are written to.
pub fn logs_path(data_dir: &Path, network: Network) -> PathBuf {
    path_with_network(data_dir, network).join("logs")
}
