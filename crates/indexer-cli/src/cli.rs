//! Argument parsing for the `indexer` binary.
//!
//! Global flags override the config file and `INDEXER_*` environment
//! variables.

use clap::{Parser, Subcommand};

/// Inspect and maintain the reference indexer queues.
#[derive(Parser, Debug)]
#[command(name = "indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the queue store path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the depth of every shard
    Counts {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List queued payloads
    Items {
        /// Only show this queue
        #[arg(short, long)]
        queue: Option<String>,

        /// Max payloads per shard
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Enqueue raw serialized payloads, e.g. to replay dead entries
    Push {
        /// Target queue
        #[arg(short, long)]
        queue: String,

        /// Routing key used to pick the shard
        #[arg(short, long, default_value = "")]
        routing: String,

        /// Payloads in wire format
        #[arg(required = true)]
        payloads: Vec<String>,
    },

    /// Verify that a search backend is configured
    Check,

    /// Print the effective configuration
    Config,

    /// Show queue store statistics
    Stats,
}
