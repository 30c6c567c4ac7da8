//! `indexer` binary.
//!
//! ```bash
//! indexer counts [--json]
//! indexer items [--queue NAME] [--limit N]
//! indexer push --queue NAME [--routing KEY] PAYLOAD...
//! indexer check
//! ```
//!
//! Configuration is layered: defaults, `~/.config/indexer/config.toml`,
//! `--config`, `INDEXER_*` env vars, then CLI flags.

use anyhow::Result;
use clap::Parser;

use indexer_cli::{
    handle_check, handle_config, handle_counts, handle_items, handle_push, handle_stats, init_logging,
    load_settings, Cli, Commands,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref(), cli.db_path.as_deref())?;
    init_logging(&settings)?;

    let output = match cli.command {
        Commands::Counts { json } => handle_counts(&settings, json)?,
        Commands::Items { queue, limit } => handle_items(&settings, queue.as_deref(), limit)?,
        Commands::Push {
            queue,
            routing,
            payloads,
        } => handle_push(&settings, &queue, &routing, &payloads)?,
        Commands::Check => handle_check(&settings)?,
        Commands::Config => handle_config(&settings)?,
        Commands::Stats => handle_stats(&settings)?,
    };
    println!("{}", output.trim_end());

    Ok(())
}
