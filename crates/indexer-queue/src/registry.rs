//! The queue registry.
//!
//! [`Queues`] is built once per process and shared by `Arc`. It owns the
//! set of registered queues, turns references into store writes, and
//! exposes the admin views (counts and queued items).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use indexer_storage::Storage;
use indexer_types::Settings;

use crate::error::QueueError;
use crate::queue::{Queue, QueueDefinition, Shard, DEAD_QUEUE, RETRY_QUEUE};
use crate::reference::Reference;

/// Depth of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCount {
    pub queue_name: String,
    pub shard: u32,
    pub count: usize,
    pub shard_limit: usize,
}

impl QueueCount {
    pub fn over_limit(&self) -> bool {
        self.count > self.shard_limit
    }
}

#[derive(Debug, Default)]
struct Registered {
    queues: Vec<Arc<Queue>>,
    raw_queues: Vec<Shard>,
}

/// Registry of queues backed by a shared [`Storage`].
pub struct Queues {
    storage: Arc<Storage>,
    namespace: String,
    enabled: bool,
    configured: Vec<QueueDefinition>,
    registered: RwLock<Registered>,
}

impl Queues {
    /// Create a registry; `configured` queues are registered lazily by
    /// [`Queues::register_all_queues`].
    pub fn new(
        storage: Arc<Storage>,
        namespace: impl Into<String>,
        configured: Vec<QueueDefinition>,
    ) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            enabled: true,
            configured,
            registered: RwLock::new(Registered::default()),
        }
    }

    pub fn from_settings(storage: Arc<Storage>, settings: &Settings) -> Self {
        let configured = settings.queues.iter().map(QueueDefinition::from).collect();
        Self::new(storage, settings.namespace.clone(), configured).with_enabled(settings.enabled)
    }

    /// When disabled, pushes are dropped and drains return immediately.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Register a queue. Repeated calls return the first registration.
    pub fn register(&self, definition: QueueDefinition) -> Result<Arc<Queue>, QueueError> {
        if let Some(existing) = self.queue(&definition.name) {
            if existing.definition() != &definition {
                warn!(
                    queue = %definition.name,
                    registered_shards = existing.definition().number_of_shards,
                    requested_shards = definition.number_of_shards,
                    "Queue already registered with a different definition, keeping the first"
                );
            }
            return Ok(existing);
        }

        validate_definition(&definition)?;

        let mut registered = self.registered.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have won the race between the read and the write lock
        if let Some(existing) = registered.queues.iter().find(|q| q.name() == definition.name) {
            return Ok(Arc::clone(existing));
        }

        let queue = Arc::new(Queue::new(&self.namespace, definition));
        registered.raw_queues.extend(queue.shards().iter().cloned());
        registered.queues.push(Arc::clone(&queue));

        debug!(
            queue = %queue.name(),
            shards = queue.shards().len(),
            key_prefix = %queue.key_prefix(),
            "Registered queue"
        );
        Ok(queue)
    }

    /// Register every configured queue plus the retry and dead queues.
    pub fn register_all_queues(&self) -> Result<(), QueueError> {
        for definition in &self.configured {
            self.register(definition.clone())?;
        }
        self.register(QueueDefinition::retry())?;
        self.register(QueueDefinition::dead())?;
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        let registered = self.registered.read().unwrap_or_else(|e| e.into_inner());
        registered.queues.iter().find(|q| q.name() == name).cloned()
    }

    pub fn queues(&self) -> Vec<Arc<Queue>> {
        let registered = self.registered.read().unwrap_or_else(|e| e.into_inner());
        registered.queues.clone()
    }

    /// Every registered shard, in registration order.
    pub fn raw_queues(&self) -> Vec<Shard> {
        let registered = self.registered.read().unwrap_or_else(|e| e.into_inner());
        registered.raw_queues.clone()
    }

    pub fn shard(&self, queue_name: &str, shard_index: u32) -> Result<Shard, QueueError> {
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| QueueError::UnknownQueue(queue_name.to_string()))?;
        queue.shard(shard_index).cloned().ok_or(QueueError::UnknownShard {
            queue: queue_name.to_string(),
            shard: shard_index,
        })
    }

    /// Enqueue references, each on the shard its routing key hashes to.
    ///
    /// Every reference is serialized before anything is written, so a bad
    /// reference rejects the whole call. Returns the number of entries written.
    pub fn push(&self, queue_name: &str, references: &[&dyn Reference]) -> Result<usize, QueueError> {
        if !self.enabled {
            debug!(queue = %queue_name, count = references.len(), "Indexing disabled, dropping push");
            return Ok(0);
        }
        self.register_all_queues()?;
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| QueueError::UnknownQueue(queue_name.to_string()))?;

        let mut by_shard: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for reference in references {
            let payload = reference.serialize()?;
            let shard = queue.shard_for(reference.routing());
            by_shard.entry(shard.shard_index).or_default().push(payload);
        }

        let mut written = 0;
        for (shard_index, payloads) in by_shard {
            if let Some(shard) = queue.shard(shard_index) {
                written += self.write_shard(shard, &payloads)?.len();
            }
        }
        Ok(written)
    }

    /// Enqueue already-serialized payloads under a single routing key.
    ///
    /// Returns the scores assigned, in payload order.
    pub fn push_serialized(
        &self,
        queue_name: &str,
        routing_key: &str,
        payloads: &[String],
    ) -> Result<Vec<u64>, QueueError> {
        if !self.enabled {
            debug!(queue = %queue_name, count = payloads.len(), "Indexing disabled, dropping push");
            return Ok(Vec::new());
        }
        self.register_all_queues()?;
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| QueueError::UnknownQueue(queue_name.to_string()))?;
        self.write_shard(queue.shard_for(routing_key), payloads)
    }

    /// Re-enqueue failed references on the retry queue.
    ///
    /// Fails without writing anything if any reference no longer encodes.
    pub fn push_to_retry(&self, references: &[Arc<dyn Reference>]) -> Result<usize, QueueError> {
        let payloads = references
            .iter()
            .map(|reference| reference.serialize())
            .collect::<Result<Vec<_>, _>>()?;
        self.retry_payloads(&payloads)
    }

    /// Re-enqueue already encoded payloads on the retry queue.
    pub fn retry_payloads(&self, payloads: &[String]) -> Result<usize, QueueError> {
        self.register(QueueDefinition::retry())?;
        Ok(self.push_serialized(RETRY_QUEUE, "", payloads)?.len())
    }

    /// Park raw payloads on the dead queue.
    pub fn move_to_dead(&self, payloads: &[String]) -> Result<usize, QueueError> {
        self.register(QueueDefinition::dead())?;
        Ok(self.push_serialized(DEAD_QUEUE, "", payloads)?.len())
    }

    /// Depth of every registered shard, retry and dead queues included.
    pub fn queue_counts(&self) -> Result<Vec<QueueCount>, QueueError> {
        self.register_all_queues()?;

        self.raw_queues()
            .into_iter()
            .map(|shard| {
                let count = self.storage.cardinality(shard.key())?;
                let entry = QueueCount {
                    queue_name: shard.queue_name,
                    shard: shard.shard_index,
                    count,
                    shard_limit: shard.shard_limit,
                };
                if entry.over_limit() {
                    warn!(
                        queue = %entry.queue_name,
                        shard = entry.shard,
                        count = entry.count,
                        shard_limit = entry.shard_limit,
                        "Shard over its advisory limit"
                    );
                }
                Ok(entry)
            })
            .collect()
    }

    /// Every queued `(payload, score)`, keyed by the shard's set name.
    pub fn all_queued_items(&self) -> Result<BTreeMap<String, Vec<(String, u64)>>, QueueError> {
        self.register_all_queues()?;

        let mut items = BTreeMap::new();
        for shard in self.raw_queues() {
            let entries = self.storage.range_entries(shard.key())?;
            items.insert(shard.zset_key(), entries);
        }
        Ok(items)
    }

    fn write_shard(&self, shard: &Shard, payloads: &[String]) -> Result<Vec<u64>, QueueError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.storage.push_entries(shard.key(), payloads)?;
        debug!(
            queue = %shard.queue_name,
            shard = shard.shard_index,
            count = scores.len(),
            "Enqueued references"
        );

        let depth = self.storage.cardinality(shard.key())?;
        if depth > shard.shard_limit {
            warn!(
                queue = %shard.queue_name,
                shard = shard.shard_index,
                depth,
                shard_limit = shard.shard_limit,
                "Shard over its advisory limit"
            );
        }
        Ok(scores)
    }
}

fn validate_definition(definition: &QueueDefinition) -> Result<(), QueueError> {
    if definition.name.is_empty() || definition.name.contains(['{', '}', ':']) {
        return Err(QueueError::InvalidQueue(format!(
            "bad queue name '{}'",
            definition.name
        )));
    }
    if definition.number_of_shards == 0 {
        return Err(QueueError::InvalidQueue(format!(
            "queue '{}' needs at least one shard",
            definition.name
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Queues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queues")
            .field("namespace", &self.namespace)
            .field("enabled", &self.enabled)
            .field("configured", &self.configured)
            .finish()
    }
}
