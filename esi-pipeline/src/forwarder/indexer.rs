//! Downstream indexer implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::json;
use tracing::{debug, trace, warn};

use super::Document;
use crate::config::IndexerSettings;
use crate::esi::install_rustls_provider;
use crate::{Error, Result};

/// Receives batches of documents.
#[async_trait]
pub trait Indexer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Upsert one batch. Implementations must be idempotent on document id.
    async fn index(&self, source_id: &str, documents: &[Document]) -> Result<()>;
}

/// Posts batches as JSON to an HTTP endpoint.
pub struct HttpIndexer {
    url: String,
    client: Client,
}

impl HttpIndexer {
    pub fn new(settings: &IndexerSettings) -> Result<Self> {
        let url = settings
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::config("indexer URL is not set"))?;
        url::Url::parse(&url).map_err(|e| Error::config(format!("invalid indexer URL {}: {}", url, e)))?;

        install_rustls_provider();

        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::config("indexer API key contains invalid characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .default_headers(headers)
            .build()?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Indexer for HttpIndexer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn index(&self, source_id: &str, documents: &[Document]) -> Result<()> {
        let payload = json!({
            "source_id": source_id,
            "documents": documents,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::forward(format!("indexer request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(source_id, %status, "Indexer rejected batch");
            return Err(Error::forward(format!("indexer returned {} - {}", status, body)));
        }

        debug!(source_id, count = documents.len(), "Indexed batch");
        Ok(())
    }
}

/// Accepts and discards every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndexer;

#[async_trait]
impl Indexer for NullIndexer {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn index(&self, source_id: &str, documents: &[Document]) -> Result<()> {
        trace!(source_id, count = documents.len(), "Discarding batch");
        Ok(())
    }
}
