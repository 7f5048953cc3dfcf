//! Ingestion cycles and the controller that drives them.

mod context;
mod controller;
mod cycle;
mod result;

pub use context::PipelineContext;
pub use controller::{PipelineController, PipelineServices};
pub use cycle::run_cycle;
pub use result::{CycleOutcome, IngestError, IngestionHistory, IngestionMetadata, IngestionResult};
