//! Response cache.
//!
//! Thread-safe store of transformed payloads keyed by source, endpoint and
//! parameters, with per-entry expiry and a background sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::DataSource;

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_id: String,
    pub endpoint: String,
    pub parameters: String,
}

impl CacheKey {
    pub fn new(
        source_id: impl Into<String>,
        endpoint: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            endpoint: endpoint.into(),
            parameters: parameters.into(),
        }
    }

    pub fn for_source(source: &DataSource) -> Self {
        Self::new(
            source.id.as_str(),
            source.endpoint.as_str(),
            source.serialized_parameters(),
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.source_id, self.endpoint, self.parameters)
    }
}

/// A cached payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<Value>,
    /// Serialized size of the payload as fetched.
    pub byte_size: usize,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn new(payload: Arc<Value>, byte_size: usize, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            payload,
            byte_size,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent response cache.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up an unexpired entry.
    ///
    /// An expired entry found here is removed on the spot.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let Some(entry) = self.entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            drop(entry); // Release the shard lock before removing
            self.entries.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Cache entry expired");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Store a payload with the configured TTL.
    pub fn insert(&self, key: CacheKey, payload: Arc<Value>, byte_size: usize) {
        let entry = CacheEntry::new(payload, byte_size, self.ttl);
        self.entries.insert(key, entry);
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Drop every entry belonging to a source.
    pub fn invalidate_source(&self, source_id: &str) {
        self.entries.retain(|key, _| key.source_id != source_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }

    /// Spawn the periodic sweep. It runs until `token` is cancelled.
    pub fn spawn_sweeper(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl: Duration,
}
