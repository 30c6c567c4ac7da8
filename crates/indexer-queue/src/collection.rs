//! Collection metadata consulted while building documents.
//!
//! The cache is filled by the host application; the queue only reads it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An embedding model version that documents of a collection are indexed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingVersion {
    /// Document field holding the vector
    pub field: String,
    pub model: String,
    pub dimensions: usize,
}

/// Metadata for one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionRecord {
    pub id: u64,
    pub name: String,
    /// Add `ref_id` and `ref_version` to every document
    #[serde(default)]
    pub include_ref_fields: bool,
    /// Merged into every document; document fields win
    #[serde(default)]
    pub shared_attributes: Map<String, Value>,
    #[serde(default)]
    pub embedding_versions: Vec<EmbeddingVersion>,
}

impl CollectionRecord {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            include_ref_fields: false,
            shared_attributes: Map::new(),
            embedding_versions: Vec::new(),
        }
    }

    pub fn with_ref_fields(mut self, include: bool) -> Self {
        self.include_ref_fields = include;
        self
    }

    pub fn with_shared_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.shared_attributes.insert(key.into(), value);
        self
    }

    pub fn with_embedding_version(mut self, version: EmbeddingVersion) -> Self {
        self.embedding_versions.push(version);
        self
    }
}

/// Concurrent lookup of collections by id.
#[derive(Debug, Default)]
pub struct CollectionCache {
    by_id: DashMap<u64, Arc<CollectionRecord>>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a collection.
    pub fn insert(&self, record: CollectionRecord) {
        self.by_id.insert(record.id, Arc::new(record));
    }

    pub fn fetch(&self, id: u64) -> Option<Arc<CollectionRecord>> {
        self.by_id.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: u64) -> Option<Arc<CollectionRecord>> {
        self.by_id.remove(&id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
