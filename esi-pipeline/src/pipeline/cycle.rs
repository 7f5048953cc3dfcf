//! One ingestion cycle for one source.
//!
//! Stages run strictly in order: overlap guard, circuit breaker, rate
//! governor, cache, fetch, validate, transform, cache store, forward,
//! persist, bookkeeping. Every failure is turned into an `IngestionResult`
//! here; nothing escapes to the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CycleOutcome, IngestError, IngestionMetadata, IngestionResult, PipelineContext};
use crate::cache::CacheKey;
use crate::domain::DataSource;
use crate::esi::{EsiError, FetchRequest, FetchResponse};
use crate::events::PipelineEvent;
use crate::forwarder::documents_from_payload;
use crate::metrics::PipelineMetric;
use crate::scheduler::SourceSlot;
use crate::store::StoredPayload;
use crate::transform::record_count;

/// Accumulates what an attempt did until it is finished.
struct Attempt {
    source_id: String,
    started: Instant,
    timestamp: DateTime<Utc>,
    record_count: usize,
    byte_size: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
    transform_ms: u64,
    forward_ms: u64,
    metadata: IngestionMetadata,
}

impl Attempt {
    fn new(slot: &SourceSlot) -> Self {
        Self {
            source_id: slot.source.id.clone(),
            started: Instant::now(),
            timestamp: Utc::now(),
            record_count: 0,
            byte_size: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            transform_ms: 0,
            forward_ms: 0,
            metadata: IngestionMetadata {
                endpoint: slot.source.endpoint.clone(),
                parameters: slot.source.parameters.clone(),
                ..Default::default()
            },
        }
    }

    fn finish(self, outcome: CycleOutcome) -> IngestionResult {
        IngestionResult {
            attempt_id: Uuid::new_v4(),
            source_id: self.source_id,
            success: outcome == CycleOutcome::Ingested,
            timestamp: self.timestamp,
            record_count: self.record_count,
            byte_size: self.byte_size,
            duration_ms: self.started.elapsed().as_millis() as u64,
            errors: self.errors,
            warnings: self.warnings,
            outcome,
            metadata: self.metadata,
        }
    }

    fn metric(&self) -> PipelineMetric {
        PipelineMetric {
            source_id: self.source_id.clone(),
            timestamp: self.timestamp,
            duration_ms: self.started.elapsed().as_millis() as u64,
            byte_size: self.byte_size,
            record_count: self.record_count,
            error_count: self.errors.len(),
            cache_hit_rate: if self.metadata.cache_hit { 1.0 } else { 0.0 },
            rate_limit_remaining: self.metadata.rate_limit_remaining,
            transform_ms: self.transform_ms,
            forward_ms: self.forward_ms,
        }
    }
}

/// Run one cycle for a source and record its outcome.
pub async fn run_cycle(ctx: &PipelineContext, slot: &SourceSlot) -> IngestionResult {
    let mut attempt = Attempt::new(slot);

    let Some(_in_flight) = slot.try_begin() else {
        info!(source_id = %attempt.source_id, "Previous cycle still running, skipping");
        attempt.warnings.push(IngestError::AlreadyRunning.to_string());
        return record(ctx, attempt, CycleOutcome::Skipped(IngestError::AlreadyRunning));
    };

    if ctx.breaker.is_tripped(slot.id()) {
        let error = IngestError::ThresholdDisabled {
            errors: ctx.breaker.count(slot.id()),
            threshold: ctx.breaker.threshold(),
        };
        if slot.force_disable() {
            warn!(source_id = %attempt.source_id, "Source disabled by circuit breaker");
            emit_error(ctx, &attempt, &error);
        }
        attempt.errors.push(error.to_string());
        return record(ctx, attempt, CycleOutcome::Skipped(error));
    }

    match ctx.governor.check() {
        Ok(remaining) => attempt.metadata.rate_limit_remaining = Some(remaining),
        Err(limit) => {
            let error = IngestError::RateLimited {
                remaining: limit.remaining,
                threshold: limit.threshold,
            };
            warn!(source_id = %attempt.source_id, %limit, "Skipping cycle");
            attempt.metadata.rate_limit_remaining = Some(limit.remaining);
            attempt.errors.push(error.to_string());
            emit_error(ctx, &attempt, &error);
            return record(ctx, attempt, CycleOutcome::Skipped(error));
        }
    }

    let source = Arc::clone(&slot.source);
    let key = CacheKey::for_source(&source);

    if let Some(entry) = ctx.cache.get(&key) {
        debug!(source_id = %attempt.source_id, "Cache hit");
        attempt.record_count = record_count(&entry.payload);
        attempt.byte_size = entry.byte_size;
        attempt.metadata.cache_hit = true;
        attempt.metadata.transform_applied = source.transform.is_some();
        return succeed(ctx, slot, attempt);
    }

    let response = match FetchRequest::from_source(&source) {
        Ok(request) => fetch_with_retry(ctx, &request).await,
        Err(e) => Err(e),
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => return fail(ctx, slot, attempt, IngestError::fetch(e.to_string())),
    };
    ctx.governor.record_call(response.rate_limit);
    if let Some(snapshot) = response.rate_limit {
        attempt.metadata.rate_limit_remaining = Some(snapshot.remaining);
    }
    attempt.metadata.pages = response.pages;
    attempt.byte_size = response.byte_size;

    if let Some(rule) = &source.validator {
        if let Err(message) = rule.validate(&response.payload) {
            return fail(ctx, slot, attempt, IngestError::validation(message));
        }
    }

    let payload = match source.transform {
        Some(kind) => {
            let transform_started = Instant::now();
            let transformed = kind.apply(response.payload);
            attempt.transform_ms = transform_started.elapsed().as_millis() as u64;
            match transformed {
                Ok(payload) => {
                    attempt.metadata.transform_applied = true;
                    payload
                }
                Err(e) => return fail(ctx, slot, attempt, IngestError::transform(e.0)),
            }
        }
        None => response.payload,
    };

    let payload = Arc::new(payload);
    attempt.record_count = record_count(&payload);
    ctx.cache.insert(key, Arc::clone(&payload), attempt.byte_size);

    if ctx.config.enable_forwarding {
        forward(ctx, &mut attempt, &source, &payload).await;
    }

    if ctx.config.enable_persistence {
        persist(ctx, &mut attempt, &payload).await;
    }

    succeed(ctx, slot, attempt)
}

async fn fetch_with_retry(
    ctx: &PipelineContext,
    request: &FetchRequest,
) -> Result<FetchResponse, EsiError> {
    let mut retries = 0;
    loop {
        let result = {
            let Some(_permit) = ctx.acquire_fetch_permit().await else {
                return Err(EsiError::Transport("fetch permits closed".to_string()));
            };
            ctx.fetcher.fetch(request).await
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) => {
                ctx.governor.record_call(None);
                if !e.is_retryable() || !ctx.retry.should_retry(retries) {
                    return Err(e);
                }
                retries += 1;
                let delay = ctx.retry.delay_for_attempt(retries);
                warn!(
                    source_id = %request.source_id,
                    error = %e,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn forward(
    ctx: &PipelineContext,
    attempt: &mut Attempt,
    source: &DataSource,
    payload: &Value,
) {
    let forward_started = Instant::now();
    let documents = documents_from_payload(source, payload, attempt.timestamp);
    let report = ctx.forwarder.forward(&source.id, &documents).await;
    attempt.forward_ms = forward_started.elapsed().as_millis() as u64;
    attempt.metadata.forwarded = report.is_complete();
    attempt.warnings.extend(report.warnings);
}

async fn persist(ctx: &PipelineContext, attempt: &mut Attempt, payload: &Value) {
    let Some(store) = &ctx.store else {
        return;
    };

    let stored = StoredPayload {
        source_id: attempt.source_id.clone(),
        ingested_at: attempt.timestamp,
        record_count: attempt.record_count,
        payload: payload.clone(),
    };
    match store.save(&stored).await {
        Ok(()) => attempt.metadata.persisted = true,
        Err(e) => {
            warn!(source_id = %attempt.source_id, error = %e, "Failed to persist payload");
            attempt.warnings.push(format!("persistence failed: {}", e));
        }
    }
}

fn succeed(ctx: &PipelineContext, slot: &SourceSlot, attempt: Attempt) -> IngestionResult {
    ctx.breaker.record_success(slot.id());
    slot.mark_success(attempt.timestamp);

    ctx.events.publish(PipelineEvent::DataIngested {
        source_id: attempt.source_id.clone(),
        record_count: attempt.record_count,
        timestamp: attempt.timestamp,
    });
    info!(
        source_id = %attempt.source_id,
        records = attempt.record_count,
        cache_hit = attempt.metadata.cache_hit,
        "Ingested"
    );

    record_metric(ctx, &attempt);
    record(ctx, attempt, CycleOutcome::Ingested)
}

fn fail(
    ctx: &PipelineContext,
    slot: &SourceSlot,
    mut attempt: Attempt,
    error: IngestError,
) -> IngestionResult {
    let errors = if error.counts_toward_breaker() {
        ctx.breaker.record_failure(slot.id())
    } else {
        ctx.breaker.count(slot.id())
    };
    warn!(
        source_id = %attempt.source_id,
        error = %error,
        consecutive_errors = errors,
        "Ingestion failed"
    );
    attempt.errors.push(error.to_string());
    emit_error(ctx, &attempt, &error);

    let threshold = ctx.breaker.threshold();
    if errors >= threshold && slot.force_disable() {
        let disabled = IngestError::ThresholdDisabled { errors, threshold };
        warn!(source_id = %attempt.source_id, "Source disabled by circuit breaker");
        attempt.errors.push(disabled.to_string());
        emit_error(ctx, &attempt, &disabled);
    }

    record_metric(ctx, &attempt);
    record(ctx, attempt, CycleOutcome::Failed(error))
}

fn emit_error(ctx: &PipelineContext, attempt: &Attempt, error: &IngestError) {
    ctx.events.publish(PipelineEvent::DataError {
        source_id: attempt.source_id.clone(),
        error: error.clone(),
        timestamp: attempt.timestamp,
    });
}

fn record_metric(ctx: &PipelineContext, attempt: &Attempt) {
    let metric = attempt.metric();
    if ctx.config.enable_metrics {
        ctx.events.publish(PipelineEvent::Metric(metric.clone()));
    }
    ctx.metrics.record(metric);
}

fn record(ctx: &PipelineContext, attempt: Attempt, outcome: CycleOutcome) -> IngestionResult {
    let result = attempt.finish(outcome);
    ctx.history.push(result.clone());
    result
}
