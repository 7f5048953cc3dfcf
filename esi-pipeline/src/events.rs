//! Pipeline events.
//!
//! Events are published fire-and-forget over a broadcast channel; a send with
//! no subscribers is not an error for the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::metrics::{MetricsSummary, PipelineMetric};
use crate::pipeline::IngestError;

/// Events emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        source_count: usize,
    },
    Stopped {
        summary: MetricsSummary,
    },
    DataIngested {
        source_id: String,
        record_count: usize,
        timestamp: DateTime<Utc>,
    },
    DataError {
        source_id: String,
        error: IngestError,
        timestamp: DateTime<Utc>,
    },
    ForwardBatch {
        source_id: String,
        batch_index: usize,
        total_batches: usize,
    },
    Metric(PipelineMetric),
}

impl PipelineEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "pipeline:started",
            Self::Stopped { .. } => "pipeline:stopped",
            Self::DataIngested { .. } => "data:ingested",
            Self::DataError { .. } => "data:error",
            Self::ForwardBatch { .. } => "forward:batch",
            Self::Metric(_) => "pipeline:metric",
        }
    }

    /// Source the event concerns, if any.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Started { .. } | Self::Stopped { .. } => None,
            Self::DataIngested { source_id, .. }
            | Self::DataError { source_id, .. }
            | Self::ForwardBatch { source_id, .. } => Some(source_id),
            Self::Metric(metric) => Some(&metric.source_id),
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            Self::Started { source_count } => {
                format!("pipeline started with {} sources", source_count)
            }
            Self::Stopped { summary } => {
                format!("pipeline stopped after {} recorded attempts", summary.count)
            }
            Self::DataIngested {
                source_id,
                record_count,
                ..
            } => format!("{}: ingested {} records", source_id, record_count),
            Self::DataError {
                source_id, error, ..
            } => format!("{}: {}", source_id, error),
            Self::ForwardBatch {
                source_id,
                batch_index,
                total_batches,
            } => format!(
                "{}: forwarded batch {}/{}",
                source_id,
                batch_index + 1,
                total_batches
            ),
            Self::Metric(metric) => format!(
                "{}: {} ms, {} records",
                metric.source_id, metric.duration_ms, metric.record_count
            ),
        }
    }
}

/// Broadcaster for pipeline events.
pub struct PipelineEventBroadcaster {
    sender: broadcast::Sender<PipelineEvent>,
}

impl PipelineEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PipelineEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PipelineEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
