//! Failure isolation: per-source circuit breaking and fetch retries.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use retry::RetryPolicy;
