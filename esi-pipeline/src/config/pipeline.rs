//! Global pipeline toggles and tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Delay growth between fetch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global switch; `start()` is a no-op when false.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum simultaneous upstream calls across all sources.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Upstream budget assumed until the first response reports one.
    #[serde(default = "default_rate_limit_total")]
    pub rate_limit_total: u32,
    /// Percentage of the budget held back; calls stop once remaining falls to it.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: f64,
    /// Window after which the local budget estimate refills.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Consecutive failures after which a source is disabled.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: u64,
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,
    /// Upper bound of the random delay before a source's first run.
    #[serde(default = "default_max_startup_jitter_ms")]
    pub max_startup_jitter_ms: u64,
    /// How long `stop()` waits for in-flight cycles.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_metrics_retention")]
    pub metrics_retention: usize,
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    #[serde(default = "default_true")]
    pub enable_forwarding: bool,
    #[serde(default)]
    pub enable_persistence: bool,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_rate_limit_total() -> u32 {
    100
}

fn default_rate_limit_buffer() -> f64 {
    10.0
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_error_threshold() -> u32 {
    5
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_cache_duration_secs() -> u64 {
    300
}

fn default_cache_sweep_interval_secs() -> u64 {
    60
}

fn default_max_startup_jitter_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_metrics_retention() -> usize {
    1000
}

fn default_history_retention() -> usize {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_requests: default_max_concurrent_requests(),
            rate_limit_total: default_rate_limit_total(),
            rate_limit_buffer: default_rate_limit_buffer(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            retry_attempts: default_retry_attempts(),
            backoff_strategy: BackoffStrategy::default(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            error_threshold: default_error_threshold(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            cache_duration_secs: default_cache_duration_secs(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
            max_startup_jitter_ms: default_max_startup_jitter_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            metrics_retention: default_metrics_retention(),
            history_retention: default_history_retention(),
            enable_forwarding: true,
            enable_persistence: false,
            enable_metrics: true,
        }
    }
}

impl PipelineConfig {
    /// Check configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.error_threshold < 1 {
            return Err(Error::config("error_threshold must be at least 1"));
        }
        if !(self.rate_limit_buffer > 0.0 && self.rate_limit_buffer <= 100.0) {
            return Err(Error::config(format!(
                "rate_limit_buffer must be in (0, 100], got {}",
                self.rate_limit_buffer
            )));
        }
        if self.rate_limit_total == 0 {
            return Err(Error::config("rate_limit_total must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::config("max_concurrent_requests must be at least 1"));
        }
        if self.metrics_retention == 0 || self.history_retention == 0 {
            return Err(Error::config("retention sizes must be at least 1"));
        }
        Ok(())
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
