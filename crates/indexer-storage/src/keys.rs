//! Key encoding and decoding for shard storage.
//!
//! Every shard owns two logical keys under a common prefix
//! `{namespace}:{{{queue}}}:{shard}`:
//! - `...:score` holds the shard's score counter
//! - `...:zset` names the shard's ordered set; each member is stored at
//!   `...:zset:{score:020}` so that RocksDB key order is score order.

use crate::error::StorageError;

/// Address of one shard of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey {
    /// Key namespace shared by all queues of a deployment
    pub namespace: String,
    /// Logical queue name
    pub queue_name: String,
    /// Shard index, `0..number_of_shards`
    pub shard_index: u32,
}

impl ShardKey {
    /// Create a key for the given shard.
    pub fn new(namespace: impl Into<String>, queue_name: impl Into<String>, shard_index: u32) -> Self {
        Self {
            namespace: namespace.into(),
            queue_name: queue_name.into(),
            shard_index,
        }
    }

    /// Common prefix: `{namespace}:{{{queue}}}:{shard}`
    pub fn prefix(&self) -> String {
        format!("{}:{{{}}}:{}", self.namespace, self.queue_name, self.shard_index)
    }

    /// Counter key: `{prefix}:score`
    pub fn score_key(&self) -> Vec<u8> {
        format!("{}:score", self.prefix()).into_bytes()
    }

    /// Logical ordered-set name: `{prefix}:zset`
    pub fn zset_key(&self) -> String {
        format!("{}:zset", self.prefix())
    }

    /// Prefix shared by every member of the ordered set
    pub fn entry_prefix(&self) -> Vec<u8> {
        format!("{}:", self.zset_key()).into_bytes()
    }

    /// Member key for a score, zero-padded for lexicographic ordering
    pub fn entry_key(&self, score: u64) -> Vec<u8> {
        format!("{}:{:020}", self.zset_key(), score).into_bytes()
    }

    /// Extract the score from a member key of this shard
    pub fn score_from_entry_key(&self, key: &[u8]) -> Result<u64, StorageError> {
        let prefix = self.entry_prefix();
        let suffix = key.strip_prefix(prefix.as_slice()).ok_or_else(|| {
            StorageError::Key(format!(
                "Key {} does not belong to {}",
                String::from_utf8_lossy(key),
                self.zset_key()
            ))
        })?;

        let s = std::str::from_utf8(suffix)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        s.parse()
            .map_err(|e| StorageError::Key(format!("Invalid score '{}': {}", s, e)))
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}
