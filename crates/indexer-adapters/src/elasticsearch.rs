//! Elasticsearch / OpenSearch bulk adapter.
//!
//! Documents are encoded as NDJSON action/source pairs and sent to
//! `POST {url}/_bulk`. The response's `items` array is answered in request
//! order, which is what the processor relies on to map failures back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use indexer_queue::{AdapterError, BulkAdapter, BulkItem, BulkResponse, Document, Operation, SearchBackend};
use indexer_types::{AdapterKind, DatabaseSettings};

/// Connection settings for an Elasticsearch-compatible cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. "http://localhost:9200"
    pub url: String,

    /// Prefixed to every collection name; empty for none
    pub index_prefix: String,

    /// Flush once this many documents are pending
    pub bulk_max_documents: usize,

    /// Flush once the request body reaches this many bytes
    pub bulk_max_bytes: usize,

    /// Request timeout
    pub timeout: Duration,

    /// Sent as `Authorization: ApiKey <key>`
    pub api_key: Option<SecretString>,

    /// Flavor, only used in the backend name
    pub kind: AdapterKind,
}

impl ElasticsearchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index_prefix: String::new(),
            bulk_max_documents: 1000,
            bulk_max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            api_key: None,
            kind: AdapterKind::Elasticsearch,
        }
    }

    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    pub fn with_bulk_limits(mut self, max_documents: usize, max_bytes: usize) -> Self {
        self.bulk_max_documents = max_documents.max(1);
        self.bulk_max_bytes = max_bytes.max(1);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }
}

impl From<&DatabaseSettings> for ElasticsearchConfig {
    fn from(settings: &DatabaseSettings) -> Self {
        let mut config = Self::new(settings.url.trim_end_matches('/'))
            .with_index_prefix(settings.index_prefix.clone())
            .with_bulk_limits(settings.bulk_max_documents, settings.bulk_max_bytes);
        config.timeout = Duration::from_secs(settings.timeout_secs);
        config.kind = settings.adapter;
        if let Some(key) = &settings.api_key {
            config = config.with_api_key(key.clone());
        }
        config
    }
}

/// Shared HTTP client for one cluster.
pub struct ElasticsearchBackend {
    client: Client,
    config: Arc<ElasticsearchConfig>,
    name: String,
}

impl ElasticsearchBackend {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        Ok(Self {
            client,
            name: config.kind.to_string(),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }
}

impl SearchBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_collection_name(&self, collection: &str) -> String {
        full_collection_name(&self.config.index_prefix, collection)
    }

    fn bulk_adapter(&self) -> Box<dyn BulkAdapter> {
        Box::new(ElasticBulkAdapter {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            body: String::new(),
            pending: 0,
        })
    }
}

fn full_collection_name(prefix: &str, collection: &str) -> String {
    if prefix.is_empty() {
        collection.to_string()
    } else {
        format!("{}-{}", prefix, collection)
    }
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing: Option<&'a str>,
}

#[derive(Deserialize)]
struct BulkApiResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct BulkApiItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// One NDJSON bulk body under construction.
pub struct ElasticBulkAdapter {
    client: Client,
    config: Arc<ElasticsearchConfig>,
    body: String,
    pending: usize,
}

impl ElasticBulkAdapter {
    /// Current request body
    pub fn body(&self) -> &str {
        &self.body
    }

    fn encode(&self, document: &Document) -> Result<String, AdapterError> {
        let meta = ActionMeta {
            index: full_collection_name(&self.config.index_prefix, &document.collection),
            id: &document.unique_identifier,
            routing: document.routing.as_deref().filter(|r| !r.is_empty()),
        };

        let mut action = Map::new();
        let action_name = match document.operation {
            Operation::Upsert => "index",
            Operation::Delete => "delete",
        };
        action.insert(
            action_name.to_string(),
            serde_json::to_value(&meta).map_err(|e| AdapterError::Encoding(e.to_string()))?,
        );

        let mut lines = serde_json::to_string(&action).map_err(|e| AdapterError::Encoding(e.to_string()))?;
        lines.push('\n');
        if document.operation == Operation::Upsert {
            lines.push_str(
                &serde_json::to_string(&document.source).map_err(|e| AdapterError::Encoding(e.to_string()))?,
            );
            lines.push('\n');
        }
        Ok(lines)
    }

    fn map_send_error(e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(e.to_string())
        } else {
            AdapterError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl BulkAdapter for ElasticBulkAdapter {
    fn add_ref(&mut self, document: Document) -> Result<(), AdapterError> {
        let lines = self.encode(&document)?;
        self.body.push_str(&lines);
        self.pending += 1;
        Ok(())
    }

    fn wants_flush(&self) -> bool {
        self.pending >= self.config.bulk_max_documents || self.body.len() >= self.config.bulk_max_bytes
    }

    fn pending(&self) -> usize {
        self.pending
    }

    async fn bulk(&mut self) -> Result<Vec<BulkResponse>, AdapterError> {
        if self.pending == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/_bulk", self.config.url);
        debug!(url = %url, documents = self.pending, bytes = self.body.len(), "Sending bulk request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(self.body.clone());
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("ApiKey {}", key.expose_secret()));
        }

        let response = request.send().await.map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http { status, body });
        }

        let parsed: BulkApiResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        let items = parsed
            .items
            .into_iter()
            .map(|entry| {
                let Some((action, inner)) = entry.into_iter().next() else {
                    return Err(AdapterError::InvalidResponse("empty bulk item".to_string()));
                };
                let item: BulkApiItem =
                    serde_json::from_value(inner).map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;
                // Deleting a document that is already gone reports 404 without an error
                let status = if action == "delete" && item.status == 404 && item.error.is_none() {
                    200
                } else {
                    item.status
                };
                Ok(BulkItem {
                    unique_identifier: item.id,
                    status,
                    error: item.error.map(|error| {
                        error
                            .get("reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| error.to_string())
                    }),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vec![BulkResponse {
            took_ms: parsed.took,
            items,
        }])
    }

    fn reset(&mut self) {
        self.body.clear();
        self.pending = 0;
    }
}
