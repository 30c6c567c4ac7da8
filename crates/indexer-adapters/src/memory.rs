//! Process-local search backend.
//!
//! Stores documents in a map per physical collection. Failures can be
//! injected for a whole request or for individual document ids, which is
//! how the drain's retry path is exercised without a cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use indexer_queue::{AdapterError, BulkAdapter, BulkItem, BulkResponse, Document, Operation, SearchBackend};

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    bulk_calls: usize,
    fail_bulk: bool,
    failing_ids: HashSet<String>,
}

/// In-memory backend; clones share the same store.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    index_prefix: String,
    max_documents: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            index_prefix: String::new(),
            max_documents: 1000,
        }
    }

    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    pub fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = max.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every following `bulk` call fail as a whole.
    pub fn set_fail_bulk(&self, fail: bool) {
        self.state().fail_bulk = fail;
    }

    /// Reject the document with this unique identifier.
    pub fn fail_document(&self, unique_identifier: impl Into<String>) {
        self.state().failing_ids.insert(unique_identifier.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_bulk = false;
        state.failing_ids.clear();
    }

    pub fn bulk_calls(&self) -> usize {
        self.state().bulk_calls
    }

    /// Stored source of a document, by logical collection name.
    pub fn document(&self, collection: &str, unique_identifier: &str) -> Option<Map<String, Value>> {
        let name = self.full_collection_name(collection);
        self.state()
            .collections
            .get(&name)
            .and_then(|docs| docs.get(unique_identifier))
            .cloned()
    }

    /// Unique identifiers stored in a logical collection, sorted.
    pub fn document_ids(&self, collection: &str) -> Vec<String> {
        let name = self.full_collection_name(collection);
        self.state()
            .collections
            .get(&name)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document_count(&self) -> usize {
        self.state().collections.values().map(BTreeMap::len).sum()
    }
}

impl SearchBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn full_collection_name(&self, collection: &str) -> String {
        if self.index_prefix.is_empty() {
            collection.to_string()
        } else {
            format!("{}-{}", self.index_prefix, collection)
        }
    }

    fn bulk_adapter(&self) -> Box<dyn BulkAdapter> {
        Box::new(InMemoryBulkAdapter {
            backend: self.clone(),
            pending: Vec::new(),
        })
    }
}

struct InMemoryBulkAdapter {
    backend: InMemoryBackend,
    pending: Vec<Document>,
}

#[async_trait]
impl BulkAdapter for InMemoryBulkAdapter {
    fn add_ref(&mut self, document: Document) -> Result<(), AdapterError> {
        self.pending.push(document);
        Ok(())
    }

    fn wants_flush(&self) -> bool {
        self.pending.len() >= self.backend.max_documents
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn bulk(&mut self) -> Result<Vec<BulkResponse>, AdapterError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = self
            .pending
            .iter()
            .map(|doc| self.backend.full_collection_name(&doc.collection))
            .collect();

        let mut state = self.backend.state();
        state.bulk_calls += 1;
        if state.fail_bulk {
            return Err(AdapterError::Simulated("bulk request rejected".to_string()));
        }

        let mut items = Vec::with_capacity(self.pending.len());
        for (doc, name) in self.pending.iter().zip(names) {
            if state.failing_ids.contains(&doc.unique_identifier) {
                items.push(BulkItem::failed(doc.unique_identifier.clone(), 400, "document rejected"));
                continue;
            }

            let collection = state.collections.entry(name).or_default();
            match doc.operation {
                Operation::Upsert => {
                    let status = if collection.contains_key(&doc.unique_identifier) { 200 } else { 201 };
                    collection.insert(doc.unique_identifier.clone(), doc.source.clone());
                    items.push(BulkItem::ok(doc.unique_identifier.clone(), status));
                }
                Operation::Delete => {
                    // Deleting a missing document is not a failure
                    collection.remove(&doc.unique_identifier);
                    items.push(BulkItem::ok(doc.unique_identifier.clone(), 200));
                }
            }
        }

        Ok(vec![BulkResponse::new(items)])
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}
