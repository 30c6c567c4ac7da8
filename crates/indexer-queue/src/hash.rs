//! Consistent shard routing.
//!
//! The shard for a routing key is the first 8 bytes of its SHA-256 digest,
//! read as a big-endian `u64`, modulo the shard count. The mapping must not
//! change between releases: entries already queued stay where they were
//! written, and producers in different processes must agree.

use sha2::{Digest, Sha256};

/// Map a routing key to a shard index in `0..number_of_shards`.
///
/// A shard count of zero is treated as one.
pub fn consistent_hash(routing_key: &str, number_of_shards: u32) -> u32 {
    let digest = Sha256::digest(routing_key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);

    let shards = u64::from(number_of_shards.max(1));
    (u64::from_be_bytes(head) % shards) as u32
}
