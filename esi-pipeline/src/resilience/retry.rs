//! Retry policy for upstream fetches.

use std::time::Duration;

use crate::config::{BackoffStrategy, PipelineConfig};

/// Retry policy derived from the pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay, still within `max_delay`.
    pub use_jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.retry_attempts,
            strategy: config.backoff_strategy,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            use_jitter: true,
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Linear => base_ms * f64::from(attempt),
            BackoffStrategy::Exponential => base_ms * 2f64.powi(attempt.saturating_sub(1) as i32),
        };
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = raw_ms.min(max_ms as f64) as u64;

        let final_ms = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            (delay_ms + jitter).min(max_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(final_ms)
    }

    /// Whether another retry is allowed after `attempt` retries so far.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
