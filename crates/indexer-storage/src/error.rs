//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Stored value could not be decoded
    #[error("Corrupt value: {0}")]
    Corrupt(String),

    /// A shard lock was poisoned by a panicking writer
    #[error("Lock error: {0}")]
    Lock(String),
}
