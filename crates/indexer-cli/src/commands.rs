//! Command implementations.

use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use indexer_adapters::load_backend;
use indexer_queue::{QueueCount, Queues};
use indexer_storage::Storage;
use indexer_types::Settings;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    db_path_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    Ok(settings)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the store and register every configured queue.
pub fn open_queues(settings: &Settings) -> Result<Queues> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let storage = Storage::open(&db_path).context("Failed to open queue storage")?;
    let queues = Queues::from_settings(Arc::new(storage), settings);
    queues.register_all_queues().context("Failed to register queues")?;
    debug!(db_path = ?db_path, queues = queues.queues().len(), "Queues ready");
    Ok(queues)
}

pub fn render_counts(counts: &[QueueCount]) -> String {
    let width = counts
        .iter()
        .map(|c| c.queue_name.len())
        .max()
        .unwrap_or(0)
        .max("QUEUE".len());

    let mut out = format!("{:<width$}  {:>5}  {:>8}  {:>6}\n", "QUEUE", "SHARD", "COUNT", "LIMIT");
    for c in counts {
        let flag = if c.over_limit() { "  over limit" } else { "" };
        out.push_str(&format!(
            "{:<width$}  {:>5}  {:>8}  {:>6}{}\n",
            c.queue_name, c.shard, c.count, c.shard_limit, flag
        ));
    }
    out
}

pub fn handle_counts(settings: &Settings, json: bool) -> Result<String> {
    let queues = open_queues(settings)?;
    let counts = queues.queue_counts().context("Failed to read queue counts")?;
    if json {
        Ok(serde_json::to_string_pretty(&counts)?)
    } else {
        Ok(render_counts(&counts))
    }
}

pub fn handle_items(settings: &Settings, queue: Option<&str>, limit: usize) -> Result<String> {
    let queues = open_queues(settings)?;
    if let Some(name) = queue {
        if queues.queue(name).is_none() {
            bail!("Unknown queue: {}", name);
        }
    }

    let items = queues.all_queued_items().context("Failed to read queued items")?;
    let mut out = String::new();
    for shard in queues.raw_queues() {
        if queue.is_some_and(|name| name != shard.queue_name) {
            continue;
        }
        let entries = items.get(&shard.zset_key()).map(Vec::as_slice).unwrap_or_default();
        out.push_str(&format!("{} ({} entries)\n", shard.zset_key(), entries.len()));
        for (payload, score) in entries.iter().take(limit) {
            out.push_str(&format!("  {:>8}  {}\n", score, payload));
        }
        if entries.len() > limit {
            out.push_str(&format!("  ... {} more\n", entries.len() - limit));
        }
    }
    Ok(out)
}

pub fn handle_push(settings: &Settings, queue: &str, routing: &str, payloads: &[String]) -> Result<String> {
    if !settings.enabled {
        bail!("Indexing is disabled; nothing would be enqueued");
    }
    let queues = open_queues(settings)?;
    let scores = queues
        .push_serialized(queue, routing, payloads)
        .with_context(|| format!("Failed to push to queue {}", queue))?;
    info!(queue = %queue, routing = %routing, count = scores.len(), "Pushed payloads");
    Ok(format!("Pushed {} payload(s) to {}", scores.len(), queue))
}

/// Fails when no backend is configured, which is fatal for any drainer.
pub fn handle_check(settings: &Settings) -> Result<String> {
    match load_backend(settings).context("Failed to build search backend")? {
        Some(backend) => Ok(format!(
            "Backend '{}' ready (collections named like {})",
            backend.name(),
            backend.full_collection_name("<collection>")
        )),
        None => bail!("No search database configured; drains cannot run"),
    }
}

pub fn handle_config(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    for database in &mut shown.databases {
        if database.api_key.is_some() {
            database.api_key = Some("[redacted]".to_string());
        }
    }
    Ok(serde_json::to_string_pretty(&shown)?)
}

pub fn handle_stats(settings: &Settings) -> Result<String> {
    let queues = open_queues(settings)?;
    let stats = queues.storage().get_stats().context("Failed to read storage stats")?;
    Ok(format!(
        "Database: {}\nEntries: {}\nShards used: {}\nDisk usage: {} bytes",
        settings.expanded_db_path().display(),
        stats.entry_count,
        stats.counter_count,
        stats.disk_usage_bytes
    ))
}
