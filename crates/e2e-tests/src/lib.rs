//! End-to-end test infrastructure for the reference indexer.
//!
//! Provides a [`TestHarness`] wiring a temporary queue store, the queue
//! registry, a reference registry with two sample variants, and an
//! in-memory search backend.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use indexer_adapters::InMemoryBackend;
use indexer_queue::{
    consistent_hash, BulkProcessQueue, CollectionCache, CollectionRecord, DrainResult, QueueDefinition, Queues,
    Reference, ReferenceCore, ReferenceError, ReferenceKind, ReferenceRegistry, SearchBackend,
};
use indexer_storage::Storage;

/// Collection id used for articles.
pub const ARTICLES: u64 = 1;
/// Collection id used for threads.
pub const THREADS: u64 = 2;

/// Reference to an article; its title is loaded by [`ArticleKind`]'s preload.
#[derive(Debug)]
pub struct ArticleRef {
    core: ReferenceCore,
}

impl ArticleRef {
    pub fn new(routing: &str, id: &str) -> Self {
        Self {
            core: ReferenceCore::new(ARTICLES, routing, vec![id.to_string()]),
        }
    }
}

#[async_trait]
impl Reference for ArticleRef {
    fn variant(&self) -> &'static str {
        "Article"
    }

    fn core(&self) -> &ReferenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ReferenceCore {
        &mut self.core
    }

    fn identifier(&self) -> String {
        self.core.args[0].clone()
    }

    /// Only reached when preload found nothing for this id.
    async fn as_indexed_jsons(&self) -> Result<Vec<Map<String, Value>>, ReferenceError> {
        Err(ReferenceError::Resolve(format!("article {} not found", self.identifier())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decodes `Article|<collection>|<routing>|<id>` and batch-loads titles.
#[derive(Debug, Default)]
pub struct ArticleKind {
    articles: RwLock<HashMap<String, String>>,
    preload_calls: AtomicUsize,
}

impl ArticleKind {
    pub fn insert(&self, id: &str, title: &str) {
        self.articles
            .write()
            .unwrap()
            .insert(id.to_string(), title.to_string());
    }

    pub fn preload_calls(&self) -> usize {
        self.preload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceKind for ArticleKind {
    fn variant(&self) -> &'static str {
        "Article"
    }

    fn decode(&self, core: ReferenceCore) -> Result<Box<dyn Reference>, ReferenceError> {
        core.arg("Article", 0)?;
        Ok(Box::new(ArticleRef { core }))
    }

    async fn preload_refs(&self, refs: &mut [Box<dyn Reference>]) -> Result<(), ReferenceError> {
        self.preload_calls.fetch_add(1, Ordering::SeqCst);
        let articles = self.articles.read().unwrap();
        for reference in refs.iter_mut() {
            if let Some(title) = articles.get(&reference.identifier()) {
                let mut doc = Map::new();
                doc.insert("title".to_string(), json!(title));
                reference.core_mut().set_documents(vec![doc]);
            }
        }
        Ok(())
    }
}

/// Reference to a discussion thread that expands into one document per post.
#[derive(Debug)]
pub struct ThreadRef {
    core: ReferenceCore,
}

impl ThreadRef {
    pub fn new(routing: &str, id: &str, posts: usize) -> Self {
        Self {
            core: ReferenceCore::new(THREADS, routing, vec![id.to_string(), posts.to_string()]),
        }
    }
}

#[async_trait]
impl Reference for ThreadRef {
    fn variant(&self) -> &'static str {
        "Thread"
    }

    fn core(&self) -> &ReferenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ReferenceCore {
        &mut self.core
    }

    fn identifier(&self) -> String {
        self.core.args[0].clone()
    }

    async fn as_indexed_jsons(&self) -> Result<Vec<Map<String, Value>>, ReferenceError> {
        let posts: usize = self
            .core
            .arg("Thread", 1)?
            .parse()
            .map_err(|_| ReferenceError::Resolve("bad post count".to_string()))?;
        Ok((0..posts)
            .map(|post| {
                let mut doc = Map::new();
                doc.insert("thread".to_string(), json!(self.identifier()));
                doc.insert("post".to_string(), json!(post));
                doc
            })
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct ThreadKind;

#[async_trait]
impl ReferenceKind for ThreadKind {
    fn variant(&self) -> &'static str {
        "Thread"
    }

    fn decode(&self, core: ReferenceCore) -> Result<Box<dyn Reference>, ReferenceError> {
        let posts = core.arg("Thread", 1)?;
        if posts.parse::<usize>().is_err() {
            return Err(ReferenceError::malformed(posts, "post count is not a number"));
        }
        Ok(Box::new(ThreadRef { core }))
    }
}

/// Shared test harness for end-to-end tests.
pub struct TestHarness {
    /// Keeps the store directory alive for the harness lifetime
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub queues: Arc<Queues>,
    pub collections: Arc<CollectionCache>,
    pub articles: Arc<ArticleKind>,
    pub references: Arc<ReferenceRegistry>,
    pub backend: InMemoryBackend,
}

impl TestHarness {
    /// Harness with the given queues under namespace `e2e`.
    pub fn new(definitions: Vec<QueueDefinition>) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));
        let queues = Arc::new(Queues::new(storage.clone(), "e2e", definitions));

        let collections = Arc::new(CollectionCache::new());
        collections.insert(CollectionRecord::new(ARTICLES, "articles"));
        collections.insert(CollectionRecord::new(THREADS, "threads"));

        let articles = Arc::new(ArticleKind::default());
        let references = Arc::new(
            ReferenceRegistry::new(collections.clone())
                .with_kind(articles.clone())
                .and_then(|r| r.with_kind(Arc::new(ThreadKind)))
                .expect("Failed to register reference kinds"),
        );

        Self {
            _temp_dir: temp_dir,
            storage,
            queues,
            collections,
            articles,
            references,
            backend: InMemoryBackend::new().with_index_prefix(""),
        }
    }

    /// Harness with a single queue.
    pub fn with_queue(name: &str, shards: u32) -> Self {
        Self::new(vec![QueueDefinition::new(name, shards)])
    }

    pub fn backend_arc(&self) -> Arc<dyn SearchBackend> {
        Arc::new(self.backend.clone())
    }

    pub fn drainer(&self, queue: &str, shard: u32) -> BulkProcessQueue {
        BulkProcessQueue::for_shard(
            self.queues.clone(),
            self.references.clone(),
            self.backend_arc(),
            queue,
            shard,
        )
        .expect("Failed to build drainer")
    }

    pub async fn drain(&self, queue: &str, shard: u32) -> DrainResult {
        self.drainer(queue, shard)
            .process()
            .await
            .expect("Drain failed")
    }

    pub fn count(&self, queue: &str, shard: u32) -> usize {
        self.queues
            .queue_counts()
            .expect("Failed to read counts")
            .into_iter()
            .find(|c| c.queue_name == queue && c.shard == shard)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Payloads currently queued on a shard, in score order.
    pub fn payloads(&self, queue: &str, shard: u32) -> Vec<String> {
        let zset = self.queues.shard(queue, shard).expect("Unknown shard").zset_key();
        self.queues
            .all_queued_items()
            .expect("Failed to read items")
            .remove(&zset)
            .unwrap_or_default()
            .into_iter()
            .map(|(payload, _)| payload)
            .collect()
    }
}

/// First routing key of the form `<prefix>-<n>` that hashes to `shard`.
pub fn routing_for_shard(prefix: &str, shard: u32, number_of_shards: u32) -> String {
    (0..10_000)
        .map(|n| format!("{}-{}", prefix, n))
        .find(|key| consistent_hash(key, number_of_shards) == shard)
        .expect("No routing key found for shard")
}
