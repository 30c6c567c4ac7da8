//! Backend selection from settings.

use std::sync::Arc;

use tracing::{info, warn};

use indexer_queue::{AdapterError, SearchBackend};
use indexer_types::{AdapterKind, Settings};

use crate::elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
use crate::memory::InMemoryBackend;

/// Build the backend for the active connection.
///
/// Returns `Ok(None)` when no database is configured; callers treat that as
/// fatal at startup.
pub fn load_backend(settings: &Settings) -> Result<Option<Arc<dyn SearchBackend>>, AdapterError> {
    let Some(database) = settings.active_database() else {
        warn!(
            connection = ?settings.connection,
            databases = settings.databases.len(),
            "No search database configured"
        );
        return Ok(None);
    };

    let backend: Arc<dyn SearchBackend> = match database.adapter {
        AdapterKind::Elasticsearch | AdapterKind::Opensearch => {
            if database.url.is_empty() {
                return Err(AdapterError::Config(format!(
                    "database '{}' has no url",
                    database.name
                )));
            }
            Arc::new(ElasticsearchBackend::new(ElasticsearchConfig::from(database))?)
        }
        AdapterKind::Memory => Arc::new(
            InMemoryBackend::new()
                .with_index_prefix(database.index_prefix.clone())
                .with_max_documents(database.bulk_max_documents),
        ),
    };

    info!(
        database = %database.name,
        adapter = %database.adapter,
        backend = %backend.name(),
        "Search backend ready"
    );
    Ok(Some(backend))
}
