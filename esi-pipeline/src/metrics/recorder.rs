//! Bounded ring of per-attempt metrics and its summary.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One row per completed ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetric {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub byte_size: usize,
    pub record_count: usize,
    pub error_count: usize,
    /// 1.0 for a cache hit, 0.0 for a miss.
    pub cache_hit_rate: f64,
    pub rate_limit_remaining: Option<u32>,
    pub transform_ms: u64,
    pub forward_ms: u64,
}

/// Aggregate over the retained metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub mean_duration_ms: f64,
    pub total_bytes: u64,
    pub total_records: u64,
    pub total_errors: u64,
    pub mean_cache_hit_rate: f64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    /// Milliseconds between the earliest and latest retained metric.
    pub span_ms: i64,
}

/// Bounded ring of metrics; the oldest entry is evicted once full.
#[derive(Debug)]
pub struct MetricsRecorder {
    entries: Mutex<VecDeque<PipelineMetric>>,
    capacity: usize,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, metric: PipelineMetric) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Most recent metrics, newest last.
    pub fn recent(&self, limit: usize) -> Vec<PipelineMetric> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return MetricsSummary::default();
        }

        let count = entries.len();
        let mut summary = MetricsSummary {
            count,
            ..Default::default()
        };
        let mut total_duration = 0u64;
        let mut total_hit_rate = 0.0;

        for metric in entries.iter() {
            total_duration += metric.duration_ms;
            total_hit_rate += metric.cache_hit_rate;
            summary.total_bytes += metric.byte_size as u64;
            summary.total_records += metric.record_count as u64;
            summary.total_errors += metric.error_count as u64;
            summary.earliest = Some(match summary.earliest {
                Some(t) if t <= metric.timestamp => t,
                _ => metric.timestamp,
            });
            summary.latest = Some(match summary.latest {
                Some(t) if t >= metric.timestamp => t,
                _ => metric.timestamp,
            });
        }

        summary.mean_duration_ms = total_duration as f64 / count as f64;
        summary.mean_cache_hit_rate = total_hit_rate / count as f64;
        if let (Some(earliest), Some(latest)) = (summary.earliest, summary.latest) {
            summary.span_ms = (latest - earliest).num_milliseconds();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metric(offset_secs: i64, duration_ms: u64, cache_hit: bool) -> PipelineMetric {
        PipelineMetric {
            source_id: "orders".into(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs),
            duration_ms,
            byte_size: 100,
            record_count: 4,
            error_count: 0,
            cache_hit_rate: if cache_hit { 1.0 } else { 0.0 },
            rate_limit_remaining: Some(90),
            transform_ms: 1,
            forward_ms: 2,
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let recorder = MetricsRecorder::new(1000);
        for i in 0..1500 {
            recorder.record(metric(i, 10, false));
        }
        assert_eq!(recorder.len(), 1000);

        let recent = recorder.recent(1);
        assert_eq!(recent[0].timestamp, DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1499));

        let summary = recorder.summary();
        assert_eq!(
            summary.earliest,
            Some(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(500))
        );
    }

    #[test]
    fn test_summary() {
        let recorder = MetricsRecorder::new(10);
        recorder.record(metric(0, 10, true));
        recorder.record(metric(2, 30, false));

        let summary = recorder.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_duration_ms, 20.0);
        assert_eq!(summary.total_bytes, 200);
        assert_eq!(summary.total_records, 8);
        assert_eq!(summary.mean_cache_hit_rate, 0.5);
        assert_eq!(summary.span_ms, 2000);
    }

    #[test]
    fn test_empty_summary() {
        let recorder = MetricsRecorder::new(0);
        assert_eq!(recorder.capacity(), 1);
        assert!(recorder.is_empty());
        assert_eq!(recorder.summary(), MetricsSummary::default());
    }
}
