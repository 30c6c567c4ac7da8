//! # indexer-types
//!
//! Shared configuration types for the reference indexer.
//!
//! - [`Settings`]: top-level settings, loaded with layered precedence
//! - [`QueueSettings`]: one logical queue and its shard count
//! - [`DatabaseSettings`]: one search backend connection
//! - [`SchedulerSettings`]: drain job schedule
//!
//! ## Usage
//!
//! ```rust,no_run
//! use indexer_types::Settings;
//!
//! let settings = Settings::load(None).unwrap();
//! println!("namespace: {}", settings.namespace);
//! ```

pub mod config;
pub mod error;

pub use config::{
    AdapterKind, DatabaseSettings, QueueSettings, SchedulerSettings, Settings,
    DEFAULT_SHARD_LIMIT,
};
pub use error::SettingsError;
