//! Shared state for ingestion cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use super::IngestionHistory;
use crate::Result;
use crate::cache::ResponseCache;
use crate::config::PipelineConfig;
use crate::domain::DataSource;
use crate::esi::{Fetcher, RateGovernor};
use crate::events::PipelineEventBroadcaster;
use crate::forwarder::{BatchForwarder, Indexer};
use crate::metrics::MetricsRecorder;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::scheduler::SourceRegistry;
use crate::store::PayloadStore;

/// Everything a cycle needs, constructed once per controller.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub sources: SourceRegistry,
    pub breaker: CircuitBreaker,
    pub governor: RateGovernor,
    pub cache: ResponseCache,
    pub retry: RetryPolicy,
    pub fetcher: Arc<dyn Fetcher>,
    pub forwarder: BatchForwarder,
    pub store: Option<Arc<dyn PayloadStore>>,
    pub metrics: MetricsRecorder,
    pub history: IngestionHistory,
    pub events: PipelineEventBroadcaster,
    fetch_permits: Semaphore,
    running: AtomicBool,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        sources: Vec<DataSource>,
        fetcher: Arc<dyn Fetcher>,
        indexer: Arc<dyn Indexer>,
        store: Option<Arc<dyn PayloadStore>>,
    ) -> Result<Self> {
        config.validate()?;
        for source in &sources {
            source.validate()?;
        }

        let events = PipelineEventBroadcaster::new();
        Ok(Self {
            sources: SourceRegistry::new(sources)?,
            breaker: CircuitBreaker::new(config.error_threshold),
            governor: RateGovernor::new(
                config.rate_limit_total,
                config.rate_limit_buffer,
                config.rate_limit_window(),
            ),
            cache: ResponseCache::new(config.cache_duration()),
            retry: RetryPolicy::from_config(&config),
            fetcher,
            forwarder: BatchForwarder::new(
                indexer,
                config.batch_size,
                config.batch_delay(),
                events.clone(),
            ),
            store,
            metrics: MetricsRecorder::new(config.metrics_retention),
            history: IngestionHistory::new(config.history_retention),
            events,
            fetch_permits: Semaphore::new(config.max_concurrent_requests),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Wait for an upstream call slot. `None` only if the semaphore was closed.
    pub async fn acquire_fetch_permit(&self) -> Option<SemaphorePermit<'_>> {
        self.fetch_permits.acquire().await.ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the running flag, returning the previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }
}
