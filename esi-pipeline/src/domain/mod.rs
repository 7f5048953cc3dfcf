//! Domain types for configured data sources.

mod priority;
mod source;

pub use priority::Priority;
pub use source::{DataSource, SourceCategory};
