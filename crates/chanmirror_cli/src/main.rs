//! chanmirror CLI
//!
//! Command-line tools for chanmirror sync state and syncs.
//!
//! # Commands
//!
//! - `status` - List every channel's sync state
//! - `inspect` - Show one channel's sync state
//! - `reset` - Forget sync progress so the next sync is a full fetch
//! - `sync` - Run one sync pass against a fixture source
//! - `watch` - Run the auto-sync scheduler until Ctrl-C

mod commands;
mod fixture;
mod jsonl;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// chanmirror command-line sync tools.
#[derive(Parser)]
#[command(name = "chanmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync state file
    #[arg(global = true, short, long, default_value = "sync-state.json")]
    state: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every channel's sync state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one channel's sync state
    Inspect {
        /// Channel id
        channel: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget sync progress
    Reset {
        /// Channel id
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        channel: Option<String>,

        /// Reset every channel
        #[arg(short, long)]
        all: bool,
    },

    /// Run one sync pass against a fixture source
    Sync {
        /// JSON file mapping channel ids to message arrays
        #[arg(long)]
        fixture: PathBuf,

        /// Channel to sync (repeatable; defaults to every fixture channel)
        #[arg(short, long = "channel")]
        channels: Vec<String>,

        /// Directory to append new messages to as <channel>.jsonl
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run the auto-sync scheduler until Ctrl-C
    Watch {
        /// JSON file mapping channel ids to message arrays
        #[arg(long)]
        fixture: PathBuf,

        /// Scheduler settings file
        #[arg(long)]
        config: PathBuf,

        /// Channel to sync (repeatable; defaults to every fixture channel)
        #[arg(short, long = "channel")]
        channels: Vec<String>,

        /// Directory to append new messages to as <channel>.jsonl
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status { format } => {
            commands::status::run(&cli.state, &format)?;
        }
        Commands::Inspect { channel, format } => {
            commands::inspect::run(&cli.state, &channel, &format)?;
        }
        Commands::Reset { channel, all } => {
            commands::reset::run(&cli.state, channel.as_deref(), all)?;
        }
        Commands::Sync {
            fixture,
            channels,
            out,
        } => {
            commands::sync::run(&cli.state, &fixture, channels, out)?;
        }
        Commands::Watch {
            fixture,
            config,
            channels,
            out,
        } => {
            commands::watch::run(&cli.state, &fixture, &config, channels, out)?;
        }
        Commands::Version => {
            println!("chanmirror CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("chanmirror engine v{}", chanmirror_engine::VERSION);
        }
    }

    Ok(())
}
