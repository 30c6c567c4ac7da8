//! Error types for references and queue operations.

use indexer_storage::StorageError;
use thiserror::Error;

/// Errors raised while encoding, decoding or resolving a reference.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// Serialized form is missing fields or has unparsable ones
    #[error("Malformed reference '{input}': {reason}")]
    Malformed { input: String, reason: String },

    /// A field would corrupt the wire format
    #[error("Field contains the reserved delimiter: {0}")]
    DelimiterInField(String),

    /// A variant tag was registered twice
    #[error("Reference variant already registered: {0}")]
    DuplicateVariant(String),

    /// The owning collection is not in the collection cache
    #[error("Unknown collection: {0}")]
    UnknownCollection(u64),

    /// Resolving documents from the origin store failed
    #[error("Resolve error: {0}")]
    Resolve(String),
}

impl ReferenceError {
    /// Build a `Malformed` error for the given input.
    pub fn malformed(input: &str, reason: impl Into<String>) -> Self {
        ReferenceError::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the queue registry and drains.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Store round trip failed; the drain left the shard untouched
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Reference encoding failed
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),

    /// Queue was never registered
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Shard index out of range for the queue
    #[error("Unknown shard {shard} for queue {queue}")]
    UnknownShard { queue: String, shard: u32 },

    /// Queue definition is unusable
    #[error("Invalid queue definition: {0}")]
    InvalidQueue(String),
}
