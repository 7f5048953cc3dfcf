//! Pipeline configuration and application settings.

mod pipeline;
mod settings;

pub use pipeline::{BackoffStrategy, PipelineConfig};
pub use settings::{
    AppSettings, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, EsiSettings, IndexerSettings,
    LoggingSettings, StoreSettings,
};
