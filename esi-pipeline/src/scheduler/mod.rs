//! Source scheduling.

mod registry;
mod service;
mod task;

pub use registry::{InFlightGuard, SourceRegistry, SourceSlot, SourceStatus};
pub use service::{Scheduler, ShutdownReport};
pub use task::SourceTask;
