//! Public control surface of the pipeline.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::{IngestionResult, PipelineContext, run_cycle};
use crate::Result;
use crate::cache::CacheStats;
use crate::config::PipelineConfig;
use crate::domain::DataSource;
use crate::esi::{Fetcher, RateGovernor};
use crate::events::PipelineEvent;
use crate::forwarder::Indexer;
use crate::metrics::MetricsSummary;
use crate::scheduler::{Scheduler, SourceStatus};
use crate::store::PayloadStore;

/// External collaborators the pipeline talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub fetcher: Arc<dyn Fetcher>,
    pub indexer: Arc<dyn Indexer>,
    pub store: Option<Arc<dyn PayloadStore>>,
}

/// Owns the pipeline state and its scheduler.
pub struct PipelineController {
    ctx: Arc<PipelineContext>,
    scheduler: Scheduler,
}

impl PipelineController {
    /// Build a controller. Invalid configuration or sources fail here.
    pub fn new(
        config: PipelineConfig,
        sources: Vec<DataSource>,
        services: PipelineServices,
    ) -> Result<Self> {
        let ctx = Arc::new(PipelineContext::new(
            config,
            sources,
            services.fetcher,
            services.indexer,
            services.store,
        )?);
        Ok(Self {
            scheduler: Scheduler::new(Arc::clone(&ctx)),
            ctx,
        })
    }

    /// Start scheduling every enabled source. Returns the number scheduled;
    /// zero when the pipeline is disabled or already running.
    pub fn start(&self) -> usize {
        if !self.ctx.config.enabled {
            info!("Pipeline disabled in configuration, not starting");
            return 0;
        }
        if self.ctx.set_running(true) {
            info!("Pipeline already running");
            return 0;
        }

        let source_count = self.scheduler.start();
        self.ctx
            .events
            .publish(PipelineEvent::Started { source_count });
        info!(source_count, "Pipeline started");
        source_count
    }

    /// Cancel all timers, wait for in-flight cycles up to the shutdown
    /// timeout, and return the metrics summary. `None` if not running.
    pub async fn stop(&self) -> Option<MetricsSummary> {
        if !self.ctx.set_running(false) {
            return None;
        }

        self.scheduler
            .shutdown(self.ctx.config.shutdown_timeout())
            .await;

        let summary = self.ctx.metrics.summary();
        self.ctx.events.publish(PipelineEvent::Stopped {
            summary: summary.clone(),
        });
        info!(attempts = summary.count, "Pipeline stopped");
        Some(summary)
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// Re-enable a source, clearing its error count, and schedule it if the
    /// pipeline is running.
    pub fn enable_source(&self, source_id: &str) -> Result<()> {
        let slot = self.ctx.sources.require(source_id)?;
        self.ctx.breaker.reset(source_id);
        slot.set_enabled(true);

        if self.ctx.is_running() {
            self.scheduler.schedule(source_id);
        }
        info!(source_id, "Source enabled");
        Ok(())
    }

    /// Disable a source and cancel its pending timer.
    pub fn disable_source(&self, source_id: &str) -> Result<()> {
        let slot = self.ctx.sources.require(source_id)?;
        slot.set_enabled(false);
        self.scheduler.cancel(source_id);
        info!(source_id, "Source disabled");
        Ok(())
    }

    /// Run one cycle immediately, outside the schedule.
    ///
    /// Works for disabled sources too; the breaker and rate governor still apply.
    pub async fn trigger_source(&self, source_id: &str) -> Result<IngestionResult> {
        let slot = self.ctx.sources.require(source_id)?;
        let result = run_cycle(&self.ctx, slot).await;
        if !slot.is_enabled() {
            self.scheduler.cancel(source_id);
        }
        Ok(result)
    }

    pub fn get_status(&self) -> Vec<SourceStatus> {
        self.ctx
            .sources
            .iter()
            .map(|slot| slot.status(self.ctx.breaker.count(slot.id())))
            .collect()
    }

    pub fn source_status(&self, source_id: &str) -> Result<SourceStatus> {
        let slot = self.ctx.sources.require(source_id)?;
        Ok(slot.status(self.ctx.breaker.count(source_id)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.ctx.events.subscribe()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.ctx.metrics.summary()
    }

    pub fn metrics_len(&self) -> usize {
        self.ctx.metrics.len()
    }

    /// Ingestion history, oldest first, optionally for one source.
    pub fn history(&self, source_id: Option<&str>) -> Vec<IngestionResult> {
        self.ctx.history.list(source_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.stats()
    }

    pub fn rate_governor(&self) -> &RateGovernor {
        &self.ctx.governor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Number of sources with an active timer loop.
    pub fn scheduled_count(&self) -> usize {
        self.scheduler.scheduled_count()
    }
}
