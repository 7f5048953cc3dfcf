//! Batched delivery to the indexer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Document, Indexer};
use crate::events::{PipelineEvent, PipelineEventBroadcaster};

/// What happened while forwarding one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub documents: usize,
    pub total_batches: usize,
    pub batches_sent: usize,
    pub failed_batches: usize,
    pub delays_applied: usize,
    pub warnings: Vec<String>,
}

impl ForwardReport {
    /// Every batch was accepted.
    pub fn is_complete(&self) -> bool {
        self.total_batches > 0 && self.failed_batches == 0
    }
}

/// Splits documents into fixed-size batches with a pause between batches.
pub struct BatchForwarder {
    indexer: Arc<dyn Indexer>,
    batch_size: usize,
    batch_delay: Duration,
    events: PipelineEventBroadcaster,
}

impl BatchForwarder {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        batch_size: usize,
        batch_delay: Duration,
        events: PipelineEventBroadcaster,
    ) -> Self {
        Self {
            indexer,
            batch_size: batch_size.max(1),
            batch_delay,
            events,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Forward every document. A failed batch is recorded as a warning and the
    /// remaining batches are still sent.
    pub async fn forward(&self, source_id: &str, documents: &[Document]) -> ForwardReport {
        let total_batches = documents.len().div_ceil(self.batch_size);
        let mut report = ForwardReport {
            documents: documents.len(),
            total_batches,
            ..Default::default()
        };

        for (batch_index, batch) in documents.chunks(self.batch_size).enumerate() {
            match self.indexer.index(source_id, batch).await {
                Ok(()) => {
                    report.batches_sent += 1;
                    self.events.publish(PipelineEvent::ForwardBatch {
                        source_id: source_id.to_string(),
                        batch_index,
                        total_batches,
                    });
                    debug!(
                        source_id,
                        batch = batch_index + 1,
                        total_batches,
                        size = batch.len(),
                        indexer = self.indexer.name(),
                        "Forwarded batch"
                    );
                }
                Err(e) => {
                    report.failed_batches += 1;
                    warn!(source_id, batch = batch_index + 1, error = %e, "Batch forwarding failed");
                    report.warnings.push(format!(
                        "batch {}/{} failed: {}",
                        batch_index + 1,
                        total_batches,
                        e
                    ));
                }
            }

            if batch_index + 1 < total_batches && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
                report.delays_applied += 1;
            }
        }

        report
    }
}
