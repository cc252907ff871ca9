//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Feed relay IRC bot.
///
/// Relays the newest post of a feed account into an IRC channel and accepts
/// chat and slash commands from the console.
#[derive(Debug, Parser)]
#[command(name = "feedrelay", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect to IRC and start relaying.
    Run,

    /// Show what the delivery ledger has recorded.
    Status {
        /// Number of recent items to list.
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
}
