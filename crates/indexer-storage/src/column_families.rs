//! Column family definitions for RocksDB.
//!
//! - queue_scores: one counter per shard, rewritten on every push
//! - queue_entries: score-ordered entries, trimmed by range after a drain

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for per-shard score counters
pub const CF_QUEUE_SCORES: &str = "queue_scores";

/// Column family name for queued entries
pub const CF_QUEUE_ENTRIES: &str = "queue_entries";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_QUEUE_SCORES, CF_QUEUE_ENTRIES];

/// Entries are short-lived and deleted in contiguous ranges.
fn entries_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_QUEUE_SCORES, Options::default()),
        ColumnFamilyDescriptor::new(CF_QUEUE_ENTRIES, entries_options()),
    ]
}
