//! Upstream fetch abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::template;
use crate::domain::DataSource;

/// Why an upstream call failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EsiError {
    #[error("HTTP {status} from {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid JSON body: {0}")]
    Decode(String),

    #[error("endpoint template error: {0}")]
    Template(String),
}

impl EsiError {
    /// Whether a retry might succeed.
    ///
    /// 420 is ESI's error-limited status; it and 429 clear with time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(*status, 420 | 429 | 500..=599),
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Decode(_) | Self::Template(_) => false,
        }
    }
}

/// Rate-limit state reported by an upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    /// Time until the upstream window resets.
    pub reset_after: Duration,
}

/// A resolved upstream request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub source_id: String,
    /// Path relative to the API base, placeholders filled.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn from_source(source: &DataSource) -> Result<Self, EsiError> {
        let (path, query) = template::render(&source.endpoint, &source.parameters)?;
        Ok(Self {
            source_id: source.id.clone(),
            path,
            query,
        })
    }
}

/// A parsed upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub payload: Value,
    /// Size of the response body in bytes.
    pub byte_size: usize,
    pub rate_limit: Option<RateLimitSnapshot>,
    /// Total pages reported by `X-Pages`, when paginated.
    pub pages: Option<u32>,
}

impl FetchResponse {
    /// Build a response from an in-memory payload without rate-limit headers.
    pub fn from_payload(payload: Value) -> Self {
        let byte_size = payload.to_string().len();
        Self {
            payload,
            byte_size,
            rate_limit: None,
            pages: None,
        }
    }
}

/// Performs upstream calls.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EsiError>;
}
