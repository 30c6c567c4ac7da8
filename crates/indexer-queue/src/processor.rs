//! Bulk batching with per-reference failure tracking.
//!
//! A reference may expand into several documents, and a batch may hold
//! documents from many references. The processor remembers which reference
//! owns each pending document so that a failed item fails exactly its owner.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::{BulkAdapter, BulkItem};
use crate::reference::Reference;

/// Counters for one processor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub bulks_sent: usize,
    pub documents_sent: usize,
}

/// Feeds references into a [`BulkAdapter`] and collects the ones that failed.
pub struct BulkProcessor {
    adapter: Box<dyn BulkAdapter>,
    refs: Vec<Arc<dyn Reference>>,
    /// Owner (index into `refs`) of each document in the current batch
    batch_owners: Vec<usize>,
    failed: BTreeSet<usize>,
    stats: ProcessorStats,
}

impl BulkProcessor {
    pub fn new(adapter: Box<dyn BulkAdapter>) -> Self {
        Self {
            adapter,
            refs: Vec::new(),
            batch_owners: Vec::new(),
            failed: BTreeSet::new(),
            stats: ProcessorStats::default(),
        }
    }

    /// Resolve a reference and add its documents, sending full batches.
    ///
    /// Resolution errors mark only this reference as failed.
    pub async fn process(&mut self, reference: Arc<dyn Reference>) {
        let owner = self.refs.len();
        self.refs.push(Arc::clone(&reference));

        let documents = match reference.jsons().await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(
                    variant = reference.variant(),
                    identifier = %reference.identifier(),
                    error = %e,
                    "Failed to resolve reference"
                );
                self.failed.insert(owner);
                return;
            }
        };

        for document in documents {
            let unique_identifier = document.unique_identifier.clone();
            if let Err(e) = self.adapter.add_ref(document) {
                warn!(
                    unique_identifier = %unique_identifier,
                    error_class = e.kind(),
                    error_message = %e,
                    "Adapter rejected document"
                );
                self.failed.insert(owner);
                continue;
            }
            self.batch_owners.push(owner);

            if self.adapter.wants_flush() {
                self.send_bulk().await;
            }
        }
    }

    /// Send the current batch; returns owners of failed documents.
    ///
    /// A request-level error fails every reference in the batch. Items the
    /// backend did not answer count as failed.
    async fn try_send_bulk(&mut self) -> BTreeSet<usize> {
        match self.adapter.bulk().await {
            Ok(responses) => {
                let items: Vec<&BulkItem> = responses.iter().flat_map(|r| r.items.iter()).collect();
                if items.len() != self.batch_owners.len() {
                    warn!(
                        expected = self.batch_owners.len(),
                        received = items.len(),
                        "Bulk response item count does not match batch"
                    );
                }

                let mut failed = BTreeSet::new();
                for (position, &owner) in self.batch_owners.iter().enumerate() {
                    match items.get(position) {
                        Some(item) if !item.is_error() => {}
                        Some(item) => {
                            debug!(
                                unique_identifier = ?item.unique_identifier,
                                status = item.status,
                                error = ?item.error,
                                "Bulk item failed"
                            );
                            failed.insert(owner);
                        }
                        None => {
                            failed.insert(owner);
                        }
                    }
                }
                failed
            }
            Err(e) => {
                warn!(
                    error_class = e.kind(),
                    error_message = %e,
                    error = ?e,
                    documents = self.batch_owners.len(),
                    "Bulk request failed, batch will be retried"
                );
                self.batch_owners.iter().copied().collect()
            }
        }
    }

    async fn send_bulk(&mut self) {
        let bulk_count = self.batch_owners.len();
        let failed = self.try_send_bulk().await;

        info!(bulk_count, errors_count = failed.len(), "Bulk request sent");

        self.stats.bulks_sent += 1;
        self.stats.documents_sent += bulk_count;
        self.failed.extend(failed);
        self.adapter.reset();
        self.batch_owners.clear();
    }

    /// Send any pending documents and return every failed reference.
    pub async fn flush(&mut self) -> Vec<Arc<dyn Reference>> {
        if !self.batch_owners.is_empty() {
            self.send_bulk().await;
        }
        self.failures()
    }

    /// References that failed so far, in processing order.
    pub fn failures(&self) -> Vec<Arc<dyn Reference>> {
        self.failed.iter().map(|&i| Arc::clone(&self.refs[i])).collect()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }
}
