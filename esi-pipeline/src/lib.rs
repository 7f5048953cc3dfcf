//! Scheduled ingestion of ESI data.
//!
//! Each configured source is fetched on its own timer, validated,
//! enriched, cached and forwarded in batches to a downstream indexer, with
//! per-source circuit breaking and a shared upstream rate budget.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod esi;
pub mod events;
pub mod forwarder;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod resilience;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod transform;

pub use error::{Error, Result};
pub use events::{PipelineEvent, PipelineEventBroadcaster};
pub use pipeline::{PipelineController, PipelineServices};
