//! Documents handed to search adapters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Write action an adapter performs for a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Upsert,
    Delete,
}

/// One indexable document resolved from a reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Logical collection name; backends add their own prefix
    pub collection: String,
    /// `<identifier>:<index>`, stable across reprocessing
    pub unique_identifier: String,
    /// Routing value forwarded to the backend
    pub routing: Option<String>,
    pub operation: Operation,
    pub source: Map<String, Value>,
}

impl Document {
    pub fn new(
        collection: impl Into<String>,
        unique_identifier: impl Into<String>,
        source: Map<String, Value>,
    ) -> Self {
        Self {
            collection: collection.into(),
            unique_identifier: unique_identifier.into(),
            routing: None,
            operation: Operation::Upsert,
            source,
        }
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Approximate encoded size of the source, used by adapters for byte limits.
    pub fn source_len(&self) -> usize {
        serde_json::to_vec(&self.source).map(|v| v.len()).unwrap_or(0)
    }
}
