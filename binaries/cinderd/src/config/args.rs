use std::{net::SocketAddr, path::PathBuf, process::exit};

use clap::builder::TypedValueParser;

use cinder_helper::network::Network;
use cinder_types::SyncMode;

use crate::config::Config;

/// Cinder args.
#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The network to run on, overrides the config file.
    #[arg(
        long,
        value_parser = clap::builder::PossibleValuesParser::new(["mainnet", "testnet", "devnet"])
            .try_map(|s| s.parse::<Network>().map_err(|_| "unknown network")),
    )]
    pub network: Option<Network>,
    /// How to sync the chain, overrides the config file.
    #[arg(
        long,
        value_parser = clap::builder::PossibleValuesParser::new(["full", "fast", "light"])
            .try_map(|s| s.parse::<SyncMode>().map_err(|_| "unknown sync mode")),
    )]
    pub sync_mode: Option<SyncMode>,
    /// A node to connect to on startup, can be given more than once.
    #[arg(long = "bootnode")]
    pub bootnodes: Vec<SocketAddr>,
    /// The port to accept connections on, `0` disables inbound connections.
    #[arg(long)]
    pub p2p_port: Option<u16>,
    /// The data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// The PATH of the `cinderd` config file.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
    /// Start without pausing when no config file is found.
    #[arg(long)]
    pub skip_config_warning: bool,
    /// Generate a config file and print it to stdout.
    #[arg(long)]
    pub generate_config: bool,
}

impl Args {
    /// Complete any quick requests asked for in [`Args`].
    ///
    /// May cause the process to [`exit`].
    pub fn do_quick_requests(&self) {
        if self.generate_config {
            println!("{}", Config::documented_config());
            exit(0);
        }
    }

    /// Apply the [`Args`] to the given [`Config`].
    pub fn apply_args(self, mut config: Config) -> Config {
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(sync_mode) = self.sync_mode {
            config.sync_mode = sync_mode;
        }
        config.p2p.bootnodes.extend(self.bootnodes);
        if let Some(p2p_port) = self.p2p_port {
            config.p2p.p2p_port = p2p_port;
        }
        if let Some(data_dir) = self.data_dir {
            config.fs.data_directory = data_dir;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn args_override_the_config() {
        let args = Args::parse_from([
            "cinderd",
            "--network",
            "devnet",
            "--sync-mode",
            "light",
            "--bootnode",
            "127.0.0.1:4000",
            "--bootnode",
            "127.0.0.1:4001",
            "--p2p-port",
            "0",
            "--data-dir",
            "/tmp/cinder",
        ]);

        let mut config = Config::default();
        config.p2p.bootnodes.push("10.0.0.1:30803".parse().unwrap());
        let config = args.apply_args(config);

        assert_eq!(config.network, Network::Devnet);
        assert_eq!(config.sync_mode, SyncMode::Light);
        assert_eq!(
            config.p2p.bootnodes,
            [
                "10.0.0.1:30803".parse::<SocketAddr>().unwrap(),
                "127.0.0.1:4000".parse().unwrap(),
                "127.0.0.1:4001".parse().unwrap(),
            ]
        );
        assert_eq!(config.p2p.p2p_port, 0);
        assert_eq!(config.fs.data_directory, PathBuf::from("/tmp/cinder"));
    }

    #[test]
    fn missing_args_keep_the_config() {
        let args = Args::parse_from(["cinderd"]);
        assert_eq!(args.apply_args(Config::default()), Config::default());
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(Args::try_parse_from(["cinderd", "--sync-mode", "snap"]).is_err());
        assert!(Args::try_parse_from(["cinderd", "--network", "stagenet"]).is_err());
    }
}
