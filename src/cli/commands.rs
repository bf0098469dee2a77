//! CLI commands for shardscan.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// shardscan - sharded, resumable database scan workers
#[derive(Parser, Debug)]
#[command(name = "shardscan", version, about = "Sharded, resumable database scan workers")]
pub struct Cli {
    /// Path to config file (overrides default locations)
    #[arg(long, global = true, env = "SHARDSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scan job over an in-memory database with a set of local workers
    Demo {
        /// Number of workers sharing the job
        #[arg(long, short = 'w')]
        workers: Option<u32>,

        /// Number of database shards
        #[arg(long, short = 's')]
        db_shards: Option<usize>,

        /// Number of entities to populate
        #[arg(long, short = 'n')]
        entities: Option<u64>,

        /// Entity kind to scan
        #[arg(long, default_value = "Player")]
        kind: String,

        /// Items per scanned batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Reload every worker from its persisted state halfway through
        #[arg(long)]
        restart: bool,
    },

    /// Manage configuration
    Config {
        /// The config subcommand to run
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration
    Show,
    /// Validate configuration
    Validate,
}

impl Cli {
    /// Parse CLI arguments
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
