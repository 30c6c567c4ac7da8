//! Operator CLI for the reference indexer.
//!
//! Reads the same settings as the host application and works directly on
//! the queue store: shard depths, queued payloads, manual re-enqueue, and a
//! backend configuration check.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    handle_check, handle_config, handle_counts, handle_items, handle_push, handle_stats, init_logging,
    load_settings, open_queues, render_counts,
};
