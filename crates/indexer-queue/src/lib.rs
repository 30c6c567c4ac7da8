//! Sharded reference queue for asynchronous search indexing.
//!
//! Producers turn domain events into [`Reference`]s and push them onto a
//! queue. Each queue is split into shards by a consistent hash of the
//! reference's routing key; a drain reads one shard in score order, resolves
//! every reference into [`Document`]s, and sends them in bulk through a
//! [`SearchBackend`].
//!
//! ## Key Components
//!
//! - [`Reference`] / [`ReferenceKind`] / [`ReferenceRegistry`]: the wire
//!   protocol and the tagged variant lookup
//! - [`Queues`]: queue registration, pushes, counts and item listings
//! - [`BulkProcessor`]: batches documents, maps failed items to references
//! - [`BulkProcessQueue`]: drains one shard, re-enqueues failures
//! - [`SearchBackend`] / [`BulkAdapter`]: what a store must implement
//!
//! ## Guarantees
//!
//! Delivery is at-least-once. Entries on one shard keep push order; shards
//! are independent and can be drained in parallel, but never two drains of
//! the same shard at once. A failed reference is always re-enqueued on
//! [`RETRY_QUEUE`] before its entry is removed.
//!
//! ## Example
//!
//! ```ignore
//! let queues = Arc::new(Queues::from_settings(storage, &settings));
//! queues.push("issues", &[&issue_ref])?;
//!
//! let drain = BulkProcessQueue::for_shard(queues, registry, backend, "issues", 0)?;
//! let result = drain.process().await?;
//! println!("processed {} failed {}", result.processed, result.failures);
//! ```

pub mod adapter;
pub mod collection;
pub mod document;
pub mod drain;
pub mod error;
pub mod hash;
pub mod processor;
pub mod queue;
pub mod reference;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterError, BulkAdapter, BulkItem, BulkResponse, SearchBackend};
pub use collection::{CollectionCache, CollectionRecord, EmbeddingVersion};
pub use document::{Document, Operation};
pub use drain::{BulkProcessQueue, DrainResult};
pub use error::{QueueError, ReferenceError};
pub use hash::consistent_hash;
pub use processor::{BulkProcessor, ProcessorStats};
pub use queue::{Queue, QueueDefinition, Shard, DEAD_QUEUE, RETRY_QUEUE};
pub use reference::{serialize_fields, Reference, ReferenceCore, ReferenceKind, ReferenceRegistry, DELIMITER};
pub use registry::{QueueCount, Queues};
