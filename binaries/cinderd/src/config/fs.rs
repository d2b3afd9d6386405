use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cinder_helper::fs::CINDER_DATA_DIR;

use super::macros::config_struct;

config_struct! {
    /// The file system config.
    #[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
    #[serde(deny_unknown_fields, default)]
    pub struct FileSystemConfig {
        #[comment_out = true]
        /// The data directory.
        ///
        /// The chain database and log files are kept here,
        /// networks other than mainnet use a sub-directory.
        ///
        /// The default directories for each OS:
        ///
        /// | OS      | Path                                               |
        /// |---------|----------------------------------------------------|
        /// | Windows | "C:\Users\Alice\AppData\Roaming\Cinder\"           |
        /// | macOS   | "/Users/Alice/Library/Application Support/Cinder/" |
        /// | Linux   | "/home/alice/.local/share/cinder/"                 |
        pub data_directory: PathBuf,
    }
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            data_directory: CINDER_DATA_DIR.to_path_buf(),
        }
    }
}
