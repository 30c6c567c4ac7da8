//! Fixtures shared by the unit tests of this crate.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::adapter::{AdapterError, BulkAdapter, BulkItem, BulkResponse, SearchBackend};
use crate::collection::CollectionRecord;
use crate::document::Document;
use crate::error::ReferenceError;
use crate::reference::{Reference, ReferenceCore, ReferenceKind};

/// Reference to a note; identifiers starting with `fail` cannot be resolved.
#[derive(Debug)]
pub struct NoteRef {
    core: ReferenceCore,
}

impl NoteRef {
    pub fn new(collection_id: u64, routing: &str, id: &str) -> Self {
        Self {
            core: ReferenceCore::new(collection_id, routing, vec![id.to_string()]),
        }
    }

    pub fn with_collection(mut self, collection: Arc<CollectionRecord>) -> Self {
        self.core = self.core.with_collection(collection);
        self
    }
}

#[async_trait]
impl Reference for NoteRef {
    fn variant(&self) -> &'static str {
        "Note"
    }

    fn core(&self) -> &ReferenceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ReferenceCore {
        &mut self.core
    }

    fn identifier(&self) -> String {
        self.core.args.first().cloned().unwrap_or_default()
    }

    async fn as_indexed_jsons(&self) -> Result<Vec<Map<String, Value>>, ReferenceError> {
        let id = self.identifier();
        if id.starts_with("fail") {
            return Err(ReferenceError::Resolve(format!("note {} not found", id)));
        }
        let mut doc = Map::new();
        doc.insert("title".to_string(), json!(format!("note {}", id)));
        Ok(vec![doc])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct NoteKind {
    preload_calls: AtomicUsize,
    fail_preload: AtomicBool,
    corrupt_routing: AtomicBool,
}

impl NoteKind {
    pub fn preload_calls(&self) -> usize {
        self.preload_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_preload(&self, fail: bool) {
        self.fail_preload.store(fail, Ordering::SeqCst);
    }

    /// Preload rewrites every routing key to one containing the delimiter.
    pub fn set_corrupt_routing(&self, corrupt: bool) {
        self.corrupt_routing.store(corrupt, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReferenceKind for NoteKind {
    fn variant(&self) -> &'static str {
        "Note"
    }

    fn decode(&self, core: ReferenceCore) -> Result<Box<dyn Reference>, ReferenceError> {
        core.arg("Note", 0)?;
        Ok(Box::new(NoteRef { core }))
    }

    async fn preload_refs(&self, refs: &mut [Box<dyn Reference>]) -> Result<(), ReferenceError> {
        self.preload_calls.fetch_add(1, Ordering::SeqCst);
        if self.corrupt_routing.load(Ordering::SeqCst) {
            for reference in refs.iter_mut() {
                reference.core_mut().routing = "tenant|7".to_string();
            }
        }
        if self.fail_preload.load(Ordering::SeqCst) {
            return Err(ReferenceError::Resolve("preload unavailable".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockState {
    bulk_calls: usize,
    sent: Vec<Document>,
    fail_bulk: bool,
    failing_ids: HashSet<String>,
    truncate_to: Option<usize>,
}

/// Recording backend with failure injection.
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    max_documents: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            max_documents: 100,
        }
    }

    pub fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = max;
        self
    }

    pub fn with_failing_id(self, unique_identifier: &str) -> Self {
        self.state.lock().unwrap().failing_ids.insert(unique_identifier.to_string());
        self
    }

    /// Answer only the first `n` items of each request.
    pub fn with_truncated_responses(self, n: usize) -> Self {
        self.state.lock().unwrap().truncate_to = Some(n);
        self
    }

    pub fn set_fail_bulk(&self, fail: bool) {
        self.state.lock().unwrap().fail_bulk = fail;
    }

    pub fn bulk_calls(&self) -> usize {
        self.state.lock().unwrap().bulk_calls
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|d| d.unique_identifier.clone())
            .collect()
    }
}

impl SearchBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn full_collection_name(&self, collection: &str) -> String {
        format!("mock-{}", collection)
    }

    fn bulk_adapter(&self) -> Box<dyn BulkAdapter> {
        Box::new(MockAdapter {
            state: Arc::clone(&self.state),
            max_documents: self.max_documents,
            pending: Vec::new(),
        })
    }
}

struct MockAdapter {
    state: Arc<Mutex<MockState>>,
    max_documents: usize,
    pending: Vec<Document>,
}

#[async_trait]
impl BulkAdapter for MockAdapter {
    fn add_ref(&mut self, document: Document) -> Result<(), AdapterError> {
        self.pending.push(document);
        Ok(())
    }

    fn wants_flush(&self) -> bool {
        self.pending.len() >= self.max_documents
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn bulk(&mut self) -> Result<Vec<BulkResponse>, AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.bulk_calls += 1;
        if state.fail_bulk {
            return Err(AdapterError::Simulated("bulk rejected".to_string()));
        }

        let mut items: Vec<BulkItem> = self
            .pending
            .iter()
            .map(|doc| {
                if state.failing_ids.contains(&doc.unique_identifier) {
                    BulkItem::failed(doc.unique_identifier.clone(), 400, "rejected")
                } else {
                    BulkItem::ok(doc.unique_identifier.clone(), 201)
                }
            })
            .collect();
        if let Some(n) = state.truncate_to {
            items.truncate(n);
        }

        let delivered: Vec<Document> = self
            .pending
            .iter()
            .filter(|doc| !state.failing_ids.contains(&doc.unique_identifier))
            .cloned()
            .collect();
        state.sent.extend(delivered);

        Ok(vec![BulkResponse::new(items)])
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}
