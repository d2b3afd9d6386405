//! General constants used throughout `cinderd`.
use std::time::Duration;

use const_format::formatcp;

/// `cinderd`'s semantic version (`MAJOR.MINOR.PATCH`) as string.
pub const VERSION: &str = clap::crate_version!();

/// [`VERSION`] + the build type.
///
/// If a debug build, the suffix is `-debug`, else it is `-release`.
pub const VERSION_BUILD: &str = if cfg!(debug_assertions) {
    formatcp!("{VERSION}-debug")
} else {
    formatcp!("{VERSION}-release")
};

pub const DEFAULT_CONFIG_WARNING: &str = formatcp!(
    "WARNING: no config file found, using default config.\
    \nGenerate a documented config with `--generate-config`.\
    \nPausing startup for {} seconds. \
    \nUse the `--skip-config-warning` arg to skip this delay if you really want to use the default.",
    DEFAULT_CONFIG_STARTUP_DELAY.as_secs()
);

pub const DEFAULT_CONFIG_STARTUP_DELAY: Duration = Duration::from_secs(15);

/// The amount of [`Command`](crate::commands::Command)s buffered between stdin and the node.
pub const COMMAND_CHANNEL_SIZE: usize = 1;

/// The message the chain database failing to open exits with.
pub const DATABASE_CORRUPT_MSG: &str = "Failed to open the chain database, it may be corrupted";

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn version_build() {
        if cfg!(debug_assertions) {
            assert_eq!(VERSION_BUILD, "0.1.0-debug");
        } else {
            assert_eq!(VERSION_BUILD, "0.1.0-release");
        }
    }
}
