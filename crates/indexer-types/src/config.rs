//! Configuration loading for the indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/indexer/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::SettingsError;

/// Advisory depth for a single shard before operators are warned.
pub const DEFAULT_SHARD_LIMIT: usize = 1000;

/// Queue names reserved for the built-in retry and dead-letter queues.
const RESERVED_QUEUE_NAMES: &[&str] = &["retry_queue", "dead_queue"];

/// Which adapter implementation serves a database entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Elasticsearch-compatible `_bulk` endpoint
    #[default]
    Elasticsearch,
    /// OpenSearch speaks the same bulk protocol
    Opensearch,
    /// Process-local store, for development and tests
    Memory,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Elasticsearch => write!(f, "elasticsearch"),
            AdapterKind::Opensearch => write!(f, "opensearch"),
            AdapterKind::Memory => write!(f, "memory"),
        }
    }
}

/// Connection definition for one search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Name used by `Settings::connection` to select this entry
    pub name: String,

    /// Adapter implementation
    #[serde(default)]
    pub adapter: AdapterKind,

    /// Base URL of the backend
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Prefix prepended to every logical collection name
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Flush a bulk request once it holds this many documents
    #[serde(default = "default_bulk_max_documents")]
    pub bulk_max_documents: usize,

    /// Flush a bulk request once its body reaches this many bytes
    #[serde(default = "default_bulk_max_bytes")]
    pub bulk_max_bytes: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// API key (prefer the INDEXER_DATABASES env override over the file)
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_database_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_prefix() -> String {
    "indexer".to_string()
}

fn default_bulk_max_documents() -> usize {
    1000
}

fn default_bulk_max_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

impl DatabaseSettings {
    /// Create a database entry with defaults for everything but name and adapter.
    pub fn new(name: impl Into<String>, adapter: AdapterKind) -> Self {
        Self {
            name: name.into(),
            adapter,
            url: default_database_url(),
            index_prefix: default_index_prefix(),
            bulk_max_documents: default_bulk_max_documents(),
            bulk_max_bytes: default_bulk_max_bytes(),
            timeout_secs: default_request_timeout(),
            api_key: None,
        }
    }
}

/// One logical queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSettings {
    /// Queue name, used in store keys
    pub name: String,

    /// Number of independently drainable shards
    #[serde(default = "default_number_of_shards")]
    pub number_of_shards: u32,

    /// Advisory depth per shard
    #[serde(default = "default_shard_limit")]
    pub shard_limit: usize,
}

fn default_number_of_shards() -> u32 {
    1
}

fn default_shard_limit() -> usize {
    DEFAULT_SHARD_LIMIT
}

impl QueueSettings {
    /// Create queue settings with the default shard limit.
    pub fn new(name: impl Into<String>, number_of_shards: u32) -> Self {
        Self {
            name: name.into(),
            number_of_shards,
            shard_limit: DEFAULT_SHARD_LIMIT,
        }
    }
}

/// Schedule for the per-shard drain jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// 6-field cron expression (default: every 30 seconds)
    #[serde(default = "default_drain_cron")]
    pub cron: String,

    /// IANA timezone for the cron expression
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Max random delay before each drain, in seconds
    #[serde(default)]
    pub jitter_secs: u64,
}

fn default_drain_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cron: default_drain_cron(),
            timezone: default_timezone(),
            jitter_secs: 0,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Master switch; when false nothing is enqueued or drained
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Prefix for every store key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Path to the RocksDB queue store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name of the active database entry; first entry when unset
    #[serde(default)]
    pub connection: Option<String>,

    /// Known search backends
    #[serde(default)]
    pub databases: Vec<DatabaseSettings>,

    /// Queues registered at startup
    #[serde(default)]
    pub queues: Vec<QueueSettings>,

    /// Drain job schedule
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_enabled() -> bool {
    true
}

fn default_namespace() -> String {
    "indexer".to_string()
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "indexer")
        .map(|p| p.data_local_dir().join("queues"))
        .unwrap_or_else(|| PathBuf::from("./queues"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            namespace: default_namespace(),
            db_path: default_db_path(),
            log_level: default_log_level(),
            connection: None,
            databases: Vec::new(),
            queues: Vec::new(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*, nested keys split on `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let config_dir = ProjectDirs::from("", "", "indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("enabled", default_enabled())?
            .set_default("namespace", default_namespace())?
            .set_default("db_path", default_db_path())?
            .set_default("log_level", default_log_level())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INDEXER_DB_PATH, INDEXER_SCHEDULER__CRON, ...
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check queue and database definitions for mistakes that would
    /// otherwise surface as misrouted entries.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.namespace.is_empty() {
            return Err(SettingsError::Invalid("namespace must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.is_empty() {
                return Err(SettingsError::Invalid("queue name must not be empty".into()));
            }
            if queue.name.contains(['{', '}', ':']) {
                return Err(SettingsError::Invalid(format!(
                    "queue name '{}' must not contain '{{', '}}' or ':'",
                    queue.name
                )));
            }
            if RESERVED_QUEUE_NAMES.contains(&queue.name.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "queue name '{}' is reserved",
                    queue.name
                )));
            }
            if queue.number_of_shards == 0 {
                return Err(SettingsError::Invalid(format!(
                    "queue '{}' needs at least one shard",
                    queue.name
                )));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "queue '{}' is defined twice",
                    queue.name
                )));
            }
        }

        if let Some(name) = &self.connection {
            if !self.databases.iter().any(|db| &db.name == name) {
                return Err(SettingsError::Invalid(format!(
                    "connection '{}' does not match any database",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Resolve the active database: the named connection, or the first entry.
    pub fn active_database(&self) -> Option<&DatabaseSettings> {
        match &self.connection {
            Some(name) => self.databases.iter().find(|db| &db.name == name),
            None => self.databases.first(),
        }
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
