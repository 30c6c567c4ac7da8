//! Queue definitions and their shards.

use indexer_storage::ShardKey;
use indexer_types::{QueueSettings, DEFAULT_SHARD_LIMIT};

use crate::hash::consistent_hash;

/// Name of the built-in queue that collects failed references.
pub const RETRY_QUEUE: &str = "retry_queue";

/// Name of the built-in queue for payloads that cannot be processed.
pub const DEAD_QUEUE: &str = "dead_queue";

/// Static description of a logical queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueDefinition {
    pub name: String,
    pub number_of_shards: u32,
    /// Advisory depth per shard; exceeding it only logs a warning
    pub shard_limit: usize,
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>, number_of_shards: u32) -> Self {
        Self {
            name: name.into(),
            number_of_shards,
            shard_limit: DEFAULT_SHARD_LIMIT,
        }
    }

    pub fn with_shard_limit(mut self, shard_limit: usize) -> Self {
        self.shard_limit = shard_limit;
        self
    }

    pub fn retry() -> Self {
        Self::new(RETRY_QUEUE, 1)
    }

    pub fn dead() -> Self {
        Self::new(DEAD_QUEUE, 1)
    }

    /// Shard index a routing key lands on.
    pub fn shard_for(&self, routing_key: &str) -> u32 {
        consistent_hash(routing_key, self.number_of_shards)
    }
}

impl From<&QueueSettings> for QueueDefinition {
    fn from(settings: &QueueSettings) -> Self {
        Self::new(settings.name.clone(), settings.number_of_shards)
            .with_shard_limit(settings.shard_limit)
    }
}

/// One independently drainable partition of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shard {
    pub queue_name: String,
    pub shard_index: u32,
    pub shard_limit: usize,
    key: ShardKey,
}

impl Shard {
    pub fn new(namespace: &str, definition: &QueueDefinition, shard_index: u32) -> Self {
        Self {
            queue_name: definition.name.clone(),
            shard_index,
            shard_limit: definition.shard_limit,
            key: ShardKey::new(namespace, definition.name.clone(), shard_index),
        }
    }

    /// Store address of this shard
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    /// Name of the ordered set holding this shard's entries
    pub fn zset_key(&self) -> String {
        self.key.zset_key()
    }
}

/// A registered queue: its definition plus the shards created for it.
#[derive(Debug, Clone)]
pub struct Queue {
    definition: QueueDefinition,
    key_prefix: String,
    shards: Vec<Shard>,
}

impl Queue {
    pub(crate) fn new(namespace: &str, definition: QueueDefinition) -> Self {
        let shards = (0..definition.number_of_shards)
            .map(|index| Shard::new(namespace, &definition, index))
            .collect();
        let key_prefix = format!("{}:{{{}}}", namespace, definition.name);
        Self {
            definition,
            key_prefix,
            shards,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.definition
    }

    /// `{namespace}:{queue}`, shared by every shard key of this queue
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn shard(&self, index: u32) -> Option<&Shard> {
        self.shards.get(index as usize)
    }

    /// Shard that entries with this routing key are written to.
    pub fn shard_for(&self, routing_key: &str) -> &Shard {
        &self.shards[self.definition.shard_for(routing_key) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_definitions() {
        let retry = QueueDefinition::retry();
        assert_eq!(retry.name, "retry_queue");
        assert_eq!(retry.number_of_shards, 1);
        assert_eq!(retry.shard_limit, 1000);

        let dead = QueueDefinition::dead();
        assert_eq!(dead.name, "dead_queue");
        assert_eq!(dead.shard_limit, 1000);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = QueueSettings::new("issues", 4);
        settings.shard_limit = 50;
        let def = QueueDefinition::from(&settings);
        assert_eq!(def, QueueDefinition::new("issues", 4).with_shard_limit(50));
    }

    #[test]
    fn test_queue_shards() {
        let queue = Queue::new("ns", QueueDefinition::new("issues", 3));
        assert_eq!(queue.key_prefix(), "ns:{issues}");
        assert_eq!(queue.shards().len(), 3);
        assert_eq!(queue.shard(2).unwrap().zset_key(), "ns:{issues}:2:zset");
        assert!(queue.shard(3).is_none());

        for key in ["a", "b", "project-1"] {
            let shard = queue.shard_for(key);
            assert_eq!(shard.shard_index, consistent_hash(key, 3));
            assert!(shard.key().prefix().starts_with(queue.key_prefix()));
        }
    }
}
