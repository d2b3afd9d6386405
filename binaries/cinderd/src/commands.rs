//! Commands
//!
//! `cinderd` [`Command`] definition and handling.
use std::{io, thread::sleep, time::Duration};

use clap::{builder::TypedValueParser, Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;

use cinder_helper::time::secs_to_hms;

use crate::{
    logging::{self, CinderTracingFilter},
    node::Node,
    statics,
    supervisor::Supervisor,
};

/// A command received from [`io::stdin`].
#[derive(Debug, Parser)]
#[command(
    multicall = true,
    subcommand_required = true,
    rename_all = "snake_case",
    help_template = "{all-args}",
    arg_required_else_help = true,
    disable_help_flag = true
)]
pub enum Command {
    /// Change the log output.
    #[command(arg_required_else_help = true, visible_alias = "set-log")]
    SetLog {
        /// The minimum log level that will be displayed.
        #[arg(
          short, long,
          value_parser = clap::builder::PossibleValuesParser::new(["off", "trace", "debug", "info", "warn", "error"])
            .try_map(|s| s.parse::<LevelFilter>()),
        )]
        level: Option<LevelFilter>,
        /// The logging output target to change.
        #[arg(value_enum, default_value_t)]
        output_target: OutputTarget,
    },

    /// Print the sync, chain and index status.
    Status,

    /// Print the connected peers.
    Peers,

    /// Cancel the running sync.
    Cancel,

    /// Gracefully shut down the node.
    Exit,
}

/// The log output target.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputTarget {
    /// The stdout logging output.
    #[default]
    Stdout,
    /// The file appender logging output.
    File,
}

/// The [`Command`] listener loop.
pub fn command_listener(incoming_commands: mpsc::Sender<Command>) {
    let mut stdin = io::stdin();
    let mut line = String::new();

    loop {
        line.clear();

        match stdin.read_line(&mut line) {
            Ok(0) => return,
            Err(e) => {
                eprintln!("Failed to read from stdin: {e}");
                sleep(Duration::from_secs(1));
                continue;
            }
            Ok(_) => {}
        }

        match Command::try_parse_from(line.split_whitespace()) {
            Ok(command) => {
                if incoming_commands.blocking_send(command).is_err() {
                    // Shutdown in progress.
                    return;
                }
            }
            Err(err) => {
                if let Err(e) = err.print() {
                    eprintln!("Failed to print command error: {e}");
                }
            }
        }
    }
}

/// The [`Command`] handler loop.
pub async fn io_loop(
    mut incoming_commands: mpsc::Receiver<Command>,
    node: &Node,
    supervisor: &Supervisor,
) {
    loop {
        let command = tokio::select! {
            biased;
            () = supervisor.cancelled() => break,
            cmd = incoming_commands.recv() => {
                let Some(cmd) = cmd else { break };
                cmd
            }
        };

        match command {
            Command::SetLog {
                level,
                output_target,
            } => {
                let modify_output = |filter: &mut CinderTracingFilter| {
                    if let Some(level) = level {
                        filter.level = level;
                    }
                    println!("NEW LOG FILTER: {filter}");
                };

                let modified = match output_target {
                    OutputTarget::File => logging::modify_file_output(modify_output),
                    OutputTarget::Stdout => logging::modify_stdout_output(modify_output),
                };
                if !modified {
                    println!("Failed to change the log filter.");
                }
            }
            Command::Status => println!("{}", status(node)),
            Command::Peers => println!("{}", peers(node)),
            Command::Cancel => {
                if node.cancel() {
                    println!("Cancelled the running sync.");
                } else {
                    println!("No sync is running.");
                }
            }
            Command::Exit => {
                supervisor.trigger_shutdown();
                break;
            }
        }
    }

    tracing::info!("Command listener shut down.");
}

/// The output of [`Command::Status`].
fn status(node: &Node) -> String {
    let (h, m, s) = secs_to_hms(statics::START_INSTANT.elapsed().as_secs());
    let chain = node.chain();
    let head = chain.head_header().map_or_else(
        |e| format!("unavailable ({e})"),
        |header| format!("{} {}", header.number, hex::encode(header.hash())),
    );

    let sync = node.sync_status();
    let downloader = node.network().downloader();
    let d = downloader.stats();
    let f = node.network().fetcher().stats();
    let (bloom, cht) = node.index_status();

    format!(
        "STATUS:\n  \
        uptime: {h}h {m}m {s}s\n  \
        mode: {}\n  \
        head: {head}\n  \
        peers: {}\n  \
        sync: {:?}, {} -> {} of {}\n  \
        downloaded: {} headers, {} bodies, {} receipts, {} state nodes\n  \
        dropped: {}, timed out: {}, stalls: {}\n  \
        announces: {} in, {} dropped, {} rate limited\n  \
        broadcasts: {} in, {} dropped, {} rate limited\n  \
        fetched: {} headers, {} bodies, {} imported, {} deferred\n  \
        bloom sections: {}, cht sections: {}",
        chain.mode(),
        node.network().peer_set().len(),
        downloader.state(),
        sync.starting_height,
        sync.current_height,
        sync.highest_known_height,
        d.headers_in,
        d.bodies_in,
        d.receipts_in,
        d.states_in,
        d.dropped,
        d.timed_out,
        d.stalls,
        f.announces_in,
        f.announces_dropped,
        f.announces_dos,
        f.broadcasts_in,
        f.broadcasts_dropped,
        f.broadcasts_dos,
        f.header_fetches,
        f.body_fetches,
        f.imported,
        f.deferred,
        bloom.sections,
        cht.sections,
    )
}

/// The output of [`Command::Peers`].
fn peers(node: &Node) -> String {
    let server_pool = node.network().server_pool();
    let mut peers = node.network().peer_set().peers();
    peers.sort_by_key(|peer| peer.id());

    let mut out = format!("PEERS: {}", peers.len());
    for peer in peers {
        let head = peer.head();
        let score = server_pool.score(&peer.id()).unwrap_or_default();
        out.push_str(&format!(
            "\n  {}: {:?} {:?}, head {}, score {score:.3}, in flight {}",
            peer.id(),
            peer.client.info.direction,
            peer.client.info.version,
            head.number,
            peer.in_flight(),
        ));
    }

    out
}
