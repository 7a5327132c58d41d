//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Bucket backfill orchestrator.
#[derive(Debug, Parser)]
#[command(name = "rebucket", version, about)]
pub struct Cli {
    /// Path to a config file (default: .rebucket.toml in the working
    /// directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Drive the pagination orchestrator to a terminal state.
    Run {
        /// Resume from a continuation cursor instead of the beginning.
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Start a worker pool consuming the object queue.
    Work {
        /// Number of concurrent consumers (overrides config).
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Inspect dead-lettered messages.
    Dlq {
        /// Maximum messages to show.
        #[arg(long, default_value_t = 20)]
        limit: i32,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect failure notices from aborted runs.
    Failures {
        /// Maximum notices to show.
        #[arg(long, default_value_t = 20)]
        limit: i32,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parses the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
