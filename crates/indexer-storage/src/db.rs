//! RocksDB wrapper for queue storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Atomic score allocation + insert (one WriteBatch per push)
//! - Full-shard reads in score order
//! - Inclusive range deletes by score

use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_QUEUE_ENTRIES, CF_QUEUE_SCORES};
use crate::error::StorageError;
use crate::keys::ShardKey;

/// Main storage interface for queue shards
pub struct Storage {
    db: DB,
    /// Serializes score allocation per shard so counter and entries stay in step
    shard_locks: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening queue storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            shard_locks: DashMap::new(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn read_score(&self, shard: &ShardKey) -> Result<u64, StorageError> {
        let cf = self.cf(CF_QUEUE_SCORES)?;
        match self.db.get_cf(cf, shard.score_key())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupt(format!("score counter for {} is {} bytes", shard, bytes.len()))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Current value of a shard's score counter (0 if never pushed).
    pub fn current_score(&self, shard: &ShardKey) -> Result<u64, StorageError> {
        self.read_score(shard)
    }

    /// Append payloads to a shard.
    ///
    /// Each payload gets the next counter value as its score. The counter and
    /// all members are written in one batch under the shard lock, so either
    /// every entry lands with a unique, increasing score or none does.
    /// Returns the assigned scores in payload order.
    pub fn push_entries(&self, shard: &ShardKey, payloads: &[String]) -> Result<Vec<u64>, StorageError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let scores_cf = self.cf(CF_QUEUE_SCORES)?;
        let entries_cf = self.cf(CF_QUEUE_ENTRIES)?;

        let lock = self
            .shard_locks
            .entry(shard.score_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().map_err(|e| StorageError::Lock(e.to_string()))?;

        let mut score = self.read_score(shard)?;
        let mut scores = Vec::with_capacity(payloads.len());
        let mut batch = WriteBatch::default();

        for payload in payloads {
            score += 1;
            batch.put_cf(entries_cf, shard.entry_key(score), payload.as_bytes());
            scores.push(score);
        }
        batch.put_cf(scores_cf, shard.score_key(), score.to_be_bytes());

        self.db.write(batch)?;
        debug!(shard = %shard, count = payloads.len(), last_score = score, "Pushed entries");

        Ok(scores)
    }

    /// Read every entry of a shard as `(payload, score)` in ascending score order.
    pub fn range_entries(&self, shard: &ShardKey) -> Result<Vec<(String, u64)>, StorageError> {
        let cf = self.cf(CF_QUEUE_ENTRIES)?;
        let prefix = shard.entry_prefix();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let score = shard.score_from_entry_key(&key)?;
            let payload = String::from_utf8(value.to_vec())
                .map_err(|e| StorageError::Corrupt(format!("entry {} of {}: {}", score, shard, e)))?;
            results.push((payload, score));
        }

        Ok(results)
    }

    /// Delete entries with `min_score <= score <= max_score`.
    ///
    /// Returns the number of entries deleted.
    pub fn remove_range_by_score(
        &self,
        shard: &ShardKey,
        min_score: u64,
        max_score: u64,
    ) -> Result<usize, StorageError> {
        if min_score > max_score {
            return Ok(0);
        }

        let cf = self.cf(CF_QUEUE_ENTRIES)?;
        let start = shard.entry_key(min_score);
        let end = shard.entry_key(max_score);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for item in iter {
            let (key, _) = item?;
            if key.as_ref() > end.as_slice() {
                break;
            }
            batch.delete_cf(cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(
                shard = %shard,
                min_score,
                max_score,
                deleted = count,
                "Removed entries by score"
            );
        }

        Ok(count)
    }

    /// Number of entries currently in a shard.
    pub fn cardinality(&self, shard: &ShardKey) -> Result<usize, StorageError> {
        let cf = self.cf(CF_QUEUE_ENTRIES)?;
        let prefix = shard.entry_prefix();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut count = 0;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            entry_count: self.count_cf_entries(self.cf(CF_QUEUE_ENTRIES)?)?,
            counter_count: self.count_cf_entries(self.cf(CF_QUEUE_SCORES)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Entries across all shards
    pub entry_count: u64,
    /// Shards that have ever been pushed to
    pub counter_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
