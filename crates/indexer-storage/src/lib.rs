//! Storage layer for the reference indexer.
//!
//! Provides a RocksDB-backed ordered-set store with:
//! - One monotonic score counter per shard
//! - One score-ordered entry set per shard
//! - Counter increment and entry insert committed in a single WriteBatch
//! - Inclusive range trimming by score

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::ShardKey;
