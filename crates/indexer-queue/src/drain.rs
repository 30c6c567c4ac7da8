//! Per-shard drain.
//!
//! Reads everything queued on one shard, sends it through a fresh
//! [`BulkProcessor`], re-enqueues failures on the retry queue, and trims the
//! processed score window. Every entry read is either delivered, moved to
//! the retry or dead queue, or left on the shard if the drain aborts.
//!
//! Two drains of the same shard must not run at the same time; callers own
//! that guarantee (see the scheduler's per-shard jobs).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::SearchBackend;
use crate::error::QueueError;
use crate::processor::BulkProcessor;
use crate::queue::Shard;
use crate::reference::{Reference, ReferenceRegistry};
use crate::registry::Queues;

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainResult {
    /// Entries read from the shard
    pub processed: usize,
    /// References pushed to the retry queue
    pub failures: usize,
    /// Entries skipped because their variant is not registered
    pub skipped: usize,
    /// Entries moved to the dead queue
    pub dead: usize,
}

impl DrainResult {
    /// `(processed, failures)`
    pub fn counts(&self) -> (usize, usize) {
        (self.processed, self.failures)
    }
}

/// Drains one shard of one queue.
pub struct BulkProcessQueue {
    queues: Arc<Queues>,
    references: Arc<ReferenceRegistry>,
    backend: Arc<dyn SearchBackend>,
    shard: Shard,
}

impl BulkProcessQueue {
    pub fn new(
        queues: Arc<Queues>,
        references: Arc<ReferenceRegistry>,
        backend: Arc<dyn SearchBackend>,
        shard: Shard,
    ) -> Self {
        Self {
            queues,
            references,
            backend,
            shard,
        }
    }

    /// Look up the shard by queue name and index.
    pub fn for_shard(
        queues: Arc<Queues>,
        references: Arc<ReferenceRegistry>,
        backend: Arc<dyn SearchBackend>,
        queue_name: &str,
        shard_index: u32,
    ) -> Result<Self, QueueError> {
        queues.register_all_queues()?;
        let shard = queues.shard(queue_name, shard_index)?;
        Ok(Self::new(queues, references, backend, shard))
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Drain the shard once.
    pub async fn process(&self) -> Result<DrainResult, QueueError> {
        if !self.queues.is_enabled() {
            debug!(queue = %self.shard.queue_name, shard = self.shard.shard_index, "Indexing disabled, skipping drain");
            return Ok(DrainResult::default());
        }

        let storage = self.queues.storage();
        let entries = storage.range_entries(self.shard.key())?;

        let (min_score, max_score) = match (
            entries.iter().map(|(_, score)| *score).min(),
            entries.iter().map(|(_, score)| *score).max(),
        ) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                debug!(queue = %self.shard.queue_name, shard = self.shard.shard_index, "Shard empty");
                return Ok(DrainResult::default());
            }
        };

        info!(
            queue = %self.shard.queue_name,
            shard = self.shard.shard_index,
            count = entries.len(),
            min_score,
            max_score,
            "Draining shard"
        );

        let mut result = DrainResult {
            processed: entries.len(),
            ..Default::default()
        };

        let mut refs = Vec::with_capacity(entries.len());
        let mut payloads = Vec::with_capacity(entries.len());
        let mut malformed = Vec::new();
        for (payload, score) in &entries {
            match self.references.deserialize(payload) {
                Ok(Some(reference)) => {
                    refs.push(reference);
                    payloads.push(payload.as_str());
                }
                Ok(None) => result.skipped += 1,
                Err(e) => {
                    warn!(
                        queue = %self.shard.queue_name,
                        shard = self.shard.shard_index,
                        score,
                        error = %e,
                        "Malformed queue entry, moving to dead queue"
                    );
                    malformed.push(payload.clone());
                }
            }
        }

        let refs = self.preload(refs).await;
        // Failures are retried with the payload read from the shard.
        let originals: HashMap<usize, &str> = refs
            .iter()
            .map(address)
            .zip(payloads)
            .collect();

        let mut processor = BulkProcessor::new(self.backend.bulk_adapter());
        for reference in refs.iter().cloned() {
            processor.process(reference).await;
        }
        let failures = processor.flush().await;

        // Failures are persisted before the trim so an aborted drain leaves
        // the shard intact instead of losing them.
        if !failures.is_empty() {
            let retry: Vec<String> = failures
                .iter()
                .filter_map(|reference| originals.get(&address(reference)))
                .map(|payload| payload.to_string())
                .collect();
            result.failures = self.queues.retry_payloads(&retry)?;
            warn!(
                queue = %self.shard.queue_name,
                shard = self.shard.shard_index,
                failures = failures.len(),
                identifiers = ?failures.iter().map(|r| r.identifier()).collect::<Vec<_>>(),
                "References failed, pushed to retry queue"
            );
        }
        if !malformed.is_empty() {
            result.dead = self.queues.move_to_dead(&malformed)?;
        }

        let removed = storage.remove_range_by_score(self.shard.key(), min_score, max_score)?;

        info!(
            queue = %self.shard.queue_name,
            shard = self.shard.shard_index,
            processed = result.processed,
            failures = result.failures,
            skipped = result.skipped,
            dead = result.dead,
            removed,
            backend = %self.backend.name(),
            "Drain complete"
        );

        Ok(result)
    }

    /// Run each variant's preload once over its group, keeping entry order.
    async fn preload(&self, refs: Vec<Box<dyn Reference>>) -> Vec<Arc<dyn Reference>> {
        let total = refs.len();
        let mut groups: BTreeMap<&'static str, (Vec<usize>, Vec<Box<dyn Reference>>)> = BTreeMap::new();
        for (position, reference) in refs.into_iter().enumerate() {
            let group = groups.entry(reference.variant()).or_default();
            group.0.push(position);
            group.1.push(reference);
        }

        let mut ordered: Vec<Option<Box<dyn Reference>>> = (0..total).map(|_| None).collect();
        for (variant, (positions, mut group)) in groups {
            if let Some(kind) = self.references.kind(variant) {
                if let Err(e) = kind.preload_refs(&mut group).await {
                    warn!(variant, count = group.len(), error = %e, "Preload failed");
                }
            }
            for (position, reference) in positions.into_iter().zip(group) {
                ordered[position] = Some(reference);
            }
        }

        ordered.into_iter().flatten().map(Arc::from).collect()
    }
}

fn address(reference: &Arc<dyn Reference>) -> usize {
    Arc::as_ptr(reference) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionCache, CollectionRecord};
    use crate::queue::{QueueDefinition, DEAD_QUEUE, RETRY_QUEUE};
    use crate::test_support::{MockBackend, NoteKind};
    use indexer_storage::Storage;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        queues: Arc<Queues>,
        registry: Arc<ReferenceRegistry>,
        kind: Arc<NoteKind>,
        backend: MockBackend,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(Storage::open(dir.path()).unwrap());
            let queues = Arc::new(Queues::new(storage, "test", vec![QueueDefinition::new("notes", 1)]));

            let cache = Arc::new(CollectionCache::new());
            cache.insert(CollectionRecord::new(1, "notes"));
            let kind = Arc::new(NoteKind::default());
            let registry = Arc::new(ReferenceRegistry::new(cache).with_kind(kind.clone()).unwrap());

            Self {
                _dir: dir,
                queues,
                registry,
                kind,
                backend: MockBackend::new(),
            }
        }

        fn drain(&self, queue: &str) -> BulkProcessQueue {
            BulkProcessQueue::for_shard(
                self.queues.clone(),
                self.registry.clone(),
                Arc::new(self.backend.clone()),
                queue,
                0,
            )
            .unwrap()
        }

        fn push(&self, payloads: &[&str]) {
            let payloads: Vec<String> = payloads.iter().map(|p| p.to_string()).collect();
            self.queues.push_serialized("notes", "r", &payloads).unwrap();
        }

        fn depth(&self, queue: &str) -> usize {
            self.queues
                .queue_counts()
                .unwrap()
                .into_iter()
                .find(|c| c.queue_name == queue)
                .map(|c| c.count)
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_empty_shard() {
        let f = Fixture::new();
        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.counts(), (0, 0));
        assert_eq!(f.backend.bulk_calls(), 0);
        assert_eq!(f.kind.preload_calls(), 0);
    }

    #[tokio::test]
    async fn test_drain_success() {
        let f = Fixture::new();
        f.push(&["Note|1|r|1", "Note|1|r|2"]);

        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.counts(), (2, 0));
        assert_eq!(f.depth("notes"), 0);
        assert_eq!(f.backend.sent_ids(), vec!["1:0", "2:0"]);
        assert_eq!(f.kind.preload_calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_go_to_retry() {
        let f = Fixture::new();
        f.push(&["Note|1|r|1", "Note|1|r|2"]);
        f.backend.set_fail_bulk(true);

        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.counts(), (2, 2));
        assert_eq!(f.depth("notes"), 0);

        let items = f.queues.all_queued_items().unwrap();
        let retried: Vec<_> = items["test:{retry_queue}:0:zset"].iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(retried, vec!["Note|1|r|1", "Note|1|r|2"]);

        // retry queue drains with the same algorithm
        f.backend.set_fail_bulk(false);
        let result = f.drain(RETRY_QUEUE).process().await.unwrap();
        assert_eq!(result.counts(), (2, 0));
        assert_eq!(f.depth(RETRY_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_entries() {
        let f = Fixture::new();
        f.push(&["Gone|1|r|1", "Note|x|r|1", "Note|1|r|3"]);

        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.processed, 3);
        assert_eq!(result.failures, 0);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.dead, 1);
        assert_eq!(f.depth("notes"), 0);
        assert_eq!(f.depth(DEAD_QUEUE), 1);
        assert_eq!(f.backend.sent_ids(), vec!["3:0"]);
    }

    #[tokio::test]
    async fn test_entries_pushed_during_drain_survive() {
        let f = Fixture::new();
        f.push(&["Note|1|r|1"]);

        let drain = f.drain("notes");
        let first = drain.process().await.unwrap();
        f.push(&["Note|1|r|2"]);

        assert_eq!(first.counts(), (1, 0));
        assert_eq!(f.depth("notes"), 1);
        assert_eq!(drain.process().await.unwrap().counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_preload_failure_does_not_stop_drain() {
        let f = Fixture::new();
        f.kind.set_fail_preload(true);
        f.push(&["Note|1|r|1"]);

        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_failed_reference_retried_as_read() {
        let f = Fixture::new();
        f.kind.set_corrupt_routing(true);
        f.backend.set_fail_bulk(true);
        f.push(&["Note|1|r|1", "Note|1|r|2"]);

        let result = f.drain("notes").process().await.unwrap();
        assert_eq!(result.counts(), (2, 2));
        assert_eq!(f.depth("notes"), 0);

        let items = f.queues.all_queued_items().unwrap();
        let retried: Vec<_> = items["test:{retry_queue}:0:zset"].iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(retried, vec!["Note|1|r|1", "Note|1|r|2"]);
    }

    #[tokio::test]
    async fn test_disabled_drain_is_noop() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let queues = Queues::new(storage.clone(), "test", vec![QueueDefinition::new("notes", 1)]);
        queues
            .push_serialized("notes", "r", &["Note|1|r|1".to_string()])
            .unwrap();
        let queues = Arc::new(Queues::new(storage, "test", vec![QueueDefinition::new("notes", 1)]).with_enabled(false));

        let backend = MockBackend::new();
        let registry = Arc::new(ReferenceRegistry::new(Arc::new(CollectionCache::new())));
        let drain =
            BulkProcessQueue::for_shard(queues.clone(), registry, Arc::new(backend.clone()), "notes", 0).unwrap();

        assert_eq!(drain.process().await.unwrap().counts(), (0, 0));
        assert_eq!(backend.bulk_calls(), 0);
        assert_eq!(storage_depth(&queues), 1);
    }

    fn storage_depth(queues: &Queues) -> usize {
        let shard = queues.shard("notes", 0).unwrap();
        queues.storage().cardinality(shard.key()).unwrap()
    }
}
