//! Per-attempt outcomes and their bounded history.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Why an ingestion cycle did not complete.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestError {
    #[error("previous cycle still running")]
    AlreadyRunning,

    #[error("rate limit reached: {remaining} remaining, threshold {threshold}")]
    RateLimited { remaining: u32, threshold: f64 },

    #[error("validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("transform failed: {message}")]
    TransformError { message: String },

    #[error("fetch failed: {message}")]
    FetchError { message: String },

    #[error("disabled after {errors} consecutive errors (threshold {threshold})")]
    ThresholdDisabled { errors: u32, threshold: u32 },
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::TransformError {
            message: message.into(),
        }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::FetchError {
            message: message.into(),
        }
    }

    /// Whether this failure increments the source's consecutive-error count.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::TransformError { .. } | Self::FetchError { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::RateLimited { .. } => "rate_limited",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::TransformError { .. } => "transform_error",
            Self::FetchError { .. } => "fetch_error",
            Self::ThresholdDisabled { .. } => "threshold_disabled",
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CycleOutcome {
    Ingested,
    /// Nothing was attempted.
    Skipped(IngestError),
    Failed(IngestError),
}

impl CycleOutcome {
    pub fn error(&self) -> Option<&IngestError> {
        match self {
            Self::Ingested => None,
            Self::Skipped(e) | Self::Failed(e) => Some(e),
        }
    }
}

/// Context describing what an attempt touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionMetadata {
    pub endpoint: String,
    pub parameters: BTreeMap<String, Value>,
    pub rate_limit_remaining: Option<u32>,
    pub cache_hit: bool,
    pub transform_applied: bool,
    pub forwarded: bool,
    pub persisted: bool,
    /// Pages reported by the upstream, when paginated.
    pub pages: Option<u32>,
}

/// Immutable record of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub attempt_id: Uuid,
    pub source_id: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub record_count: usize,
    pub byte_size: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub outcome: CycleOutcome,
    pub metadata: IngestionMetadata,
}

impl IngestionResult {
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Skipped(_))
    }

    pub fn error(&self) -> Option<&IngestError> {
        self.outcome.error()
    }
}

/// Bounded, append-only ring of results.
#[derive(Debug)]
pub struct IngestionHistory {
    entries: Mutex<VecDeque<IngestionResult>>,
    capacity: usize,
}

impl IngestionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, result: IngestionResult) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Results oldest first, optionally restricted to one source.
    pub fn list(&self, source_id: Option<&str>) -> Vec<IngestionResult> {
        self.entries
            .lock()
            .iter()
            .filter(|r| source_id.is_none_or(|id| r.source_id == id))
            .cloned()
            .collect()
    }

    pub fn latest(&self, source_id: &str) -> Option<IngestionResult> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|r| r.source_id == source_id)
            .cloned()
    }
}
