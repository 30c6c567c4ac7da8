//! # indexer-adapters
//!
//! Concrete search backends for the reference indexer.
//!
//! ## Backends
//!
//! - [`ElasticsearchBackend`]: HTTP `_bulk` API (Elasticsearch and OpenSearch)
//! - [`InMemoryBackend`]: process-local store with failure injection, for
//!   tests and local development
//!
//! [`load_backend`] picks the backend named by the settings' active
//! connection.
//!
//! ```rust,ignore
//! let settings = Settings::load(None)?;
//! let backend = load_backend(&settings)?.expect("no search connection configured");
//! println!("using {}", backend.name());
//! ```

pub mod elasticsearch;
pub mod factory;
pub mod memory;

pub use elasticsearch::{ElasticBulkAdapter, ElasticsearchBackend, ElasticsearchConfig};
pub use factory::load_backend;
pub use memory::InMemoryBackend;
