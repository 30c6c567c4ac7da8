//! Search backend interfaces.
//!
//! A [`SearchBackend`] is the long-lived connection to one store. Each drain
//! asks it for a fresh [`BulkAdapter`], fills it with documents, and sends
//! the batch whenever the adapter reports it is full.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Document;

/// Errors raised by a bulk request as a whole.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Document could not be encoded for this backend
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure injected by a test backend
    #[error("Simulated failure: {0}")]
    Simulated(String),
}

impl AdapterError {
    /// Short class name used as the `error_class` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Connection(_) => "connection",
            AdapterError::Timeout(_) => "timeout",
            AdapterError::Http { .. } => "http",
            AdapterError::InvalidResponse(_) => "invalid_response",
            AdapterError::Encoding(_) => "encoding",
            AdapterError::Config(_) => "config",
            AdapterError::Simulated(_) => "simulated",
        }
    }
}

/// Outcome for one document of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItem {
    pub unique_identifier: Option<String>,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItem {
    pub fn ok(unique_identifier: impl Into<String>, status: u16) -> Self {
        Self {
            unique_identifier: Some(unique_identifier.into()),
            status,
            error: None,
        }
    }

    pub fn failed(unique_identifier: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            unique_identifier: Some(unique_identifier.into()),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status >= 300
    }
}

/// Per-item results of one bulk request, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn new(items: Vec<BulkItem>) -> Self {
        Self { took_ms: 0, items }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(BulkItem::is_error)
    }
}

/// A shared connection to a search store.
pub trait SearchBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Physical index name for a logical collection.
    fn full_collection_name(&self, collection: &str) -> String;

    /// Start an empty batch.
    fn bulk_adapter(&self) -> Box<dyn BulkAdapter>;
}

/// One in-flight batch of documents.
///
/// Documents are answered in the order they were added; `bulk` may split the
/// batch into several requests and return one response per request.
#[async_trait]
pub trait BulkAdapter: Send {
    /// Queue a document. An error rejects only this document.
    fn add_ref(&mut self, document: Document) -> Result<(), AdapterError>;

    /// True once the batch reached its document or byte limit.
    fn wants_flush(&self) -> bool;

    /// Documents waiting to be sent.
    fn pending(&self) -> usize;

    /// Send pending documents.
    async fn bulk(&mut self) -> Result<Vec<BulkResponse>, AdapterError>;

    /// Drop pending documents after a send.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_errors() {
        assert!(!BulkItem::ok("1:0", 201).is_error());
        assert!(BulkItem::failed("1:0", 400, "mapper_parsing_exception").is_error());

        let odd = BulkItem {
            unique_identifier: None,
            status: 429,
            error: None,
        };
        assert!(odd.is_error());
    }

    #[test]
    fn test_response_has_errors() {
        let response = BulkResponse::new(vec![BulkItem::ok("1:0", 200), BulkItem::failed("2:0", 409, "conflict")]);
        assert!(response.has_errors());
        assert!(!BulkResponse::default().has_errors());
    }

    #[test]
    fn test_error_kind() {
        let err = AdapterError::Http {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.kind(), "http");
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
        assert_eq!(AdapterError::Timeout("30s".into()).kind(), "timeout");
    }
}
