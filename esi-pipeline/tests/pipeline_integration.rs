mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{
    MockFetcher, RecordingIndexer, config, controller, drain, prices, prices_source, status_error,
};
use esi_pipeline::PipelineEvent;
use esi_pipeline::config::PipelineConfig;
use esi_pipeline::domain::{DataSource, Priority, SourceCategory};
use esi_pipeline::esi::RateLimitSnapshot;
use esi_pipeline::pipeline::{CycleOutcome, IngestError};
use esi_pipeline::store::{PayloadStore, SqliteStore};
use esi_pipeline::transform::{TransformKind, ValidationRule};

#[tokio::test]
async fn test_cycle_does_not_overlap_itself() {
    let fetcher = Arc::new(MockFetcher::gated(prices(2)));
    let controller = Arc::new(controller(
        config(),
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    ));
    let mut rx = controller.subscribe();

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.trigger_source("prices").await })
    };
    fetcher.gate().entered.notified().await;

    let second = controller.trigger_source("prices").await.unwrap();
    assert!(!second.success);
    assert_eq!(second.outcome, CycleOutcome::Skipped(IngestError::AlreadyRunning));
    assert!(
        drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, PipelineEvent::DataError { .. })),
        "skipped cycles are not errors"
    );

    fetcher.gate().release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(first.success);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(controller.get_status()[0].consecutive_errors, 0);
    assert_eq!(controller.metrics_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_until_expiry() {
    let fetcher = Arc::new(MockFetcher::returning(prices(3)));
    let controller = controller(
        PipelineConfig {
            cache_duration_secs: 300,
            ..config()
        },
        vec![prices_source().with_transform(TransformKind::Market)],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    let miss = controller.trigger_source("prices").await.unwrap();
    let hit = controller.trigger_source("prices").await.unwrap();
    assert_eq!(fetcher.calls(), 1);
    assert!(!miss.metadata.cache_hit);
    assert!(hit.metadata.cache_hit);
    assert!(hit.metadata.transform_applied);
    assert_eq!(hit.record_count, 3);

    tokio::time::advance(Duration::from_secs(301)).await;
    let refetched = controller.trigger_source("prices").await.unwrap();
    assert!(!refetched.metadata.cache_hit);
    assert_eq!(fetcher.calls(), 2);

    let summary = controller.metrics_summary();
    assert_eq!(summary.count, 3);
    assert!((summary.mean_cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_disables_until_reenabled() {
    let fetcher = Arc::new(MockFetcher::failing(404));
    let controller = controller(
        PipelineConfig {
            error_threshold: 3,
            ..config()
        },
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    assert_eq!(controller.start(), 1);
    // Runs at 0s, 60s and 120s, then trips.
    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(fetcher.calls(), 3);

    let status = controller.get_status().remove(0);
    assert!(!status.enabled);
    assert_eq!(status.consecutive_errors, 3);
    assert!(status.next_update.is_none());
    assert!(status.last_update.is_none());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(fetcher.calls(), 3, "disabled source must not run");

    let disabled_events = drain(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::DataError {
                    error: IngestError::ThresholdDisabled { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(disabled_events, 1);

    controller.enable_source("prices").unwrap();
    assert_eq!(controller.get_status()[0].consecutive_errors, 0);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fetcher.calls(), 4);
    assert!(controller.get_status()[0].enabled);
    assert_eq!(controller.get_status()[0].consecutive_errors, 1);

    assert!(controller.stop().await.is_some());
}

#[tokio::test]
async fn test_rate_governor_short_circuits() {
    let fetcher = Arc::new(MockFetcher::returning(prices(1)));
    let controller = controller(
        PipelineConfig {
            rate_limit_total: 100,
            rate_limit_buffer: 10.0,
            ..config()
        },
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    controller.rate_governor().observe(RateLimitSnapshot {
        remaining: 5,
        reset_after: Duration::from_secs(60),
    });

    let result = controller.trigger_source("prices").await.unwrap();
    assert_eq!(
        result.outcome,
        CycleOutcome::Skipped(IngestError::RateLimited {
            remaining: 5,
            threshold: 10.0
        })
    );
    assert_eq!(fetcher.calls(), 0);

    let status = controller.get_status().remove(0);
    assert!(status.enabled);
    assert_eq!(status.consecutive_errors, 0);
    assert_eq!(controller.metrics_len(), 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "data:error");
}

#[tokio::test(start_paused = true)]
async fn test_batches_of_ten() {
    let fetcher = Arc::new(MockFetcher::returning(prices(25)));
    let indexer = Arc::new(RecordingIndexer::default());
    let controller = controller(
        PipelineConfig {
            batch_size: 10,
            batch_delay_ms: 250,
            ..config()
        },
        vec![prices_source()],
        fetcher,
        indexer.clone(),
        None,
    );
    let mut rx = controller.subscribe();

    let started = tokio::time::Instant::now();
    let result = controller.trigger_source("prices").await.unwrap();
    assert!(result.success);
    assert!(result.metadata.forwarded);
    assert_eq!(indexer.batch_sizes(), vec![10, 10, 5]);
    assert_eq!(started.elapsed(), Duration::from_millis(500));

    let batches: Vec<(usize, usize)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::ForwardBatch {
                batch_index,
                total_batches,
                ..
            } => Some((batch_index, total_batches)),
            _ => None,
        })
        .collect();
    assert_eq!(batches, vec![(0, 3), (1, 3), (2, 3)]);

    let first_batch = indexer.batches.lock()[0].clone();
    assert_eq!(first_batch[0], "prices:34");
}

#[tokio::test(start_paused = true)]
async fn test_failing_validator_disables_after_two_ticks() {
    let fetcher = Arc::new(MockFetcher::returning(prices(2)));
    let source = prices_source().with_validator(ValidationRule::required_fields(["never_present"]));
    let controller = controller(
        PipelineConfig {
            error_threshold: 2,
            ..config()
        },
        vec![source],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    controller.start();
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert_eq!(fetcher.calls(), 2);
    assert!(!controller.get_status()[0].enabled);

    let events = drain(&mut rx);
    let count = |kind: &str| {
        events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::DataError { error, .. } if error.kind() == kind))
            .count()
    };
    assert_eq!(count("validation_failed"), 2);
    assert_eq!(count("threshold_disabled"), 1);
    assert!(events.iter().all(|e| !matches!(e, PipelineEvent::DataIngested { .. })));

    let summary = controller.stop().await.unwrap();
    assert_eq!(summary.count, 2);
    assert!(controller.stop().await.is_none());
}

#[tokio::test]
async fn test_metrics_ring_is_bounded() {
    let fetcher = Arc::new(MockFetcher::returning(prices(1)));
    let controller = controller(
        PipelineConfig {
            metrics_retention: 1000,
            enable_forwarding: false,
            ..config()
        },
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    for _ in 0..1500 {
        controller.trigger_source("prices").await.unwrap();
    }

    assert_eq!(controller.metrics_len(), 1000);
    assert_eq!(controller.metrics_summary().count, 1000);
    assert_eq!(fetcher.calls(), 1);
    assert!(controller.history(Some("prices")).len() <= controller.config().history_retention);
}

#[tokio::test]
async fn test_unknown_source_is_not_found() {
    let controller = controller(
        config(),
        vec![prices_source()],
        Arc::new(MockFetcher::returning(prices(1))),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    assert!(controller.trigger_source("missing").await.unwrap_err().is_not_found());
    assert!(controller.enable_source("missing").unwrap_err().is_not_found());
    assert!(controller.disable_source("missing").unwrap_err().is_not_found());
    assert!(controller.source_status("missing").unwrap_err().is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_retryable_fetch_errors_are_retried() {
    let fetcher = Arc::new(
        MockFetcher::returning(prices(1))
            .then(Err(status_error(503)))
            .then(Err(status_error(420))),
    );
    let controller = controller(
        config(),
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    let result = controller.trigger_source("prices").await.unwrap();
    assert!(result.success);
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(controller.get_status()[0].consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_are_one_fetch_error() {
    let fetcher = Arc::new(MockFetcher::failing(502));
    let controller = controller(
        PipelineConfig {
            retry_attempts: 2,
            ..config()
        },
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    let result = controller.trigger_source("prices").await.unwrap();
    assert!(matches!(
        result.outcome,
        CycleOutcome::Failed(IngestError::FetchError { .. })
    ));
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(controller.get_status()[0].consecutive_errors, 1);
}

#[tokio::test]
async fn test_forwarding_failure_is_a_warning() {
    let controller = controller(
        config(),
        vec![prices_source()],
        Arc::new(MockFetcher::returning(prices(3))),
        Arc::new(RecordingIndexer::rejecting()),
        None,
    );

    let result = controller.trigger_source("prices").await.unwrap();
    assert!(result.success);
    assert!(!result.metadata.forwarded);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(controller.get_status()[0].consecutive_errors, 0);
    assert!(controller.get_status()[0].last_update.is_some());
}

#[tokio::test]
async fn test_transform_error_counts_toward_breaker() {
    let source = DataSource::new(
        "corp",
        "Corporation",
        "/corporations/{corporation_id}/",
        SourceCategory::Corporation,
        60,
    )
    .with_parameter("corporation_id", 98000001)
    .with_transform(TransformKind::Corporation);

    let controller = controller(
        config(),
        vec![source],
        Arc::new(MockFetcher::returning(json!({"name": "No member count"}))),
        Arc::new(RecordingIndexer::default()),
        None,
    );

    let result = controller.trigger_source("corp").await.unwrap();
    assert!(matches!(
        result.outcome,
        CycleOutcome::Failed(IngestError::TransformError { .. })
    ));
    assert_eq!(controller.get_status()[0].consecutive_errors, 1);
    assert_eq!(controller.cache_stats().entry_count, 0);
}

#[tokio::test]
async fn test_persistence_writes_transformed_payload() {
    let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
    let controller = controller(
        PipelineConfig {
            enable_persistence: true,
            ..config()
        },
        vec![prices_source().with_transform(TransformKind::Market)],
        Arc::new(MockFetcher::returning(prices(2))),
        Arc::new(RecordingIndexer::default()),
        Some(Arc::new(store.clone())),
    );

    let result = controller.trigger_source("prices").await.unwrap();
    assert!(result.metadata.persisted);

    let stored = store.latest("prices").await.unwrap().unwrap();
    assert_eq!(stored.record_count, 2);
    assert_eq!(stored.payload[0]["price_spread_ratio"], 1.2);
    assert_eq!(stored.ingested_at.timestamp_millis(), result.timestamp.timestamp_millis());
}

#[tokio::test(start_paused = true)]
async fn test_start_stop_lifecycle() {
    let fetcher = Arc::new(MockFetcher::returning(prices(1)));
    let sources = vec![
        prices_source().with_priority(Priority::High),
        DataSource::new("status", "Server status", "/status/", SourceCategory::Universe, 5),
        DataSource::new("off", "Disabled", "/status/", SourceCategory::Universe, 5).disabled(),
    ];
    let controller = controller(
        config(),
        sources,
        fetcher,
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    assert_eq!(controller.start(), 2);
    assert!(controller.is_running());
    assert_eq!(controller.start(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.scheduled_count(), 2);

    controller.disable_source("status").unwrap();
    assert_eq!(controller.scheduled_count(), 1);

    let summary = controller.stop().await.unwrap();
    assert!(!controller.is_running());
    assert_eq!(summary.count, 2);

    let names: Vec<&str> = drain(&mut rx).iter().map(PipelineEvent::name).collect();
    assert_eq!(names.first(), Some(&"pipeline:started"));
    assert_eq!(names.last(), Some(&"pipeline:stopped"));

    // Restart after stop.
    assert_eq!(controller.start(), 1);
    controller.stop().await;
}

#[tokio::test]
async fn test_disabled_pipeline_does_not_start() {
    let controller = controller(
        PipelineConfig {
            enabled: false,
            ..config()
        },
        vec![prices_source()],
        Arc::new(MockFetcher::returning(prices(1))),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    assert_eq!(controller.start(), 0);
    assert!(!controller.is_running());
    assert!(controller.stop().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_and_releases_stuck_source() {
    let fetcher = Arc::new(MockFetcher::gated(prices(2)));
    let controller = controller(
        PipelineConfig {
            shutdown_timeout_secs: 2,
            ..config()
        },
        vec![prices_source()],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    assert_eq!(controller.start(), 1);
    fetcher.gate().entered.notified().await;
    assert!(controller.get_status()[0].in_flight);

    let stopping = tokio::time::Instant::now();
    let summary = controller.stop().await.unwrap();
    let elapsed = stopping.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(summary.count, 0, "an aborted cycle records nothing");
    assert!(!controller.get_status()[0].in_flight);
    assert_eq!(controller.scheduled_count(), 0);
    assert_eq!(
        drain(&mut rx).last().map(PipelineEvent::name),
        Some("pipeline:stopped")
    );

    fetcher.gate().release.notify_one();
    let result = controller.trigger_source("prices").await.unwrap();
    assert_eq!(result.outcome, CycleOutcome::Ingested);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_concurrency_is_bounded() {
    let fetcher = Arc::new(MockFetcher::gated(prices(1)));
    let controller = Arc::new(controller(
        PipelineConfig {
            max_concurrent_requests: 1,
            ..config()
        },
        vec![
            prices_source(),
            DataSource::new("status", "Server status", "/status/", SourceCategory::Universe, 5),
        ],
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    ));

    let trigger = |id: &'static str| {
        let controller = controller.clone();
        tokio::spawn(async move { controller.trigger_source(id).await })
    };

    let first = trigger("prices");
    fetcher.gate().entered.notified().await;

    let second = trigger("status");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 1, "second fetch waits for a permit");
    assert!(controller.source_status("status").unwrap().in_flight);

    fetcher.gate().release.notify_one();
    assert!(first.await.unwrap().unwrap().success);

    fetcher.gate().entered.notified().await;
    assert_eq!(fetcher.calls(), 2);
    fetcher.gate().release.notify_one();
    assert!(second.await.unwrap().unwrap().success);
}

#[tokio::test(start_paused = true)]
async fn test_first_runs_fall_within_startup_jitter() {
    let fetcher = Arc::new(MockFetcher::returning(prices(1)));
    let sources: Vec<DataSource> = (0..5)
        .map(|i| {
            DataSource::new(
                format!("status-{i}"),
                "Server status",
                "/status/",
                SourceCategory::Universe,
                60,
            )
        })
        .collect();
    let controller = controller(
        PipelineConfig {
            max_startup_jitter_ms: 5_000,
            ..config()
        },
        sources,
        fetcher.clone(),
        Arc::new(RecordingIndexer::default()),
        None,
    );
    let mut rx = controller.subscribe();

    let started = tokio::time::Instant::now();
    assert_eq!(controller.start(), 5);

    let mut ingested = 0;
    while ingested < 5 {
        if let PipelineEvent::DataIngested { .. } = rx.recv().await.unwrap() {
            assert!(started.elapsed() <= Duration::from_millis(5_000));
            ingested += 1;
        }
    }
    assert_eq!(fetcher.calls(), 5);
    assert!(
        controller
            .get_status()
            .iter()
            .all(|s| s.next_update.is_some() && s.last_update.is_some())
    );

    controller.stop().await;
}
