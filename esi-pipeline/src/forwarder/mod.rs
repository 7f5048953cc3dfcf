//! Hand-off of transformed payloads to the downstream indexer.

mod batch;
mod document;
mod indexer;

pub use batch::{BatchForwarder, ForwardReport};
pub use document::{Document, documents_from_payload};
pub use indexer::{HttpIndexer, Indexer, NullIndexer};
