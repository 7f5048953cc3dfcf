//! Per-attempt metrics.

mod recorder;

pub use recorder::{MetricsRecorder, MetricsSummary, PipelineMetric};
