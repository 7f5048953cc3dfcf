//! Per-source consecutive-error counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Circuit breaker keyed by source id.
///
/// Unlike a cooldown breaker there is no half-open state: once a source's
/// counter reaches the threshold it stays tripped until [`reset`] is called,
/// which happens when an operator re-enables the source.
///
/// [`reset`]: CircuitBreaker::reset
#[derive(Debug)]
pub struct CircuitBreaker {
    counters: RwLock<HashMap<String, Arc<AtomicU32>>>,
    threshold: u32,
}

impl CircuitBreaker {
    /// Create a breaker. A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn counter(&self, source_id: &str) -> Arc<AtomicU32> {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(source_id) {
                return counter.clone();
            }
        }

        let mut counters = self.counters.write();
        counters
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    /// Current consecutive failure count.
    pub fn count(&self, source_id: &str) -> u32 {
        self.counters
            .read()
            .get(source_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Whether the source has reached the threshold.
    pub fn is_tripped(&self, source_id: &str) -> bool {
        self.count(source_id) >= self.threshold
    }

    /// Record a failed attempt and return the new count.
    pub fn record_failure(&self, source_id: &str) -> u32 {
        let failures = self.counter(source_id).fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            warn!(
                source_id = %source_id,
                failures,
                threshold = self.threshold,
                "Error threshold reached"
            );
        } else {
            debug!(source_id = %source_id, failures, "Recorded source failure");
        }
        failures
    }

    /// Record a successful attempt.
    pub fn record_success(&self, source_id: &str) {
        if let Some(counter) = self.counters.read().get(source_id) {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Reset a source's counter to zero.
    pub fn reset(&self, source_id: &str) {
        self.record_success(source_id);
        debug!(source_id = %source_id, "Circuit breaker reset");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5)
    }
}
