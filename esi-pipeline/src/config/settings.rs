//! Application settings loaded from a JSON file plus environment overrides.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::PipelineConfig;
use crate::domain::DataSource;
use crate::{Error, Result};

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "ESI_PIPELINE_CONFIG";

/// Settings file used when `ESI_PIPELINE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "pipeline.json";

/// Upstream API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value of the `datasource` query parameter appended to every call.
    #[serde(default = "default_datasource")]
    pub datasource: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_base_url() -> String {
    "https://esi.evetech.net/latest".to_string()
}

fn default_datasource() -> String {
    "tranquility".to_string()
}

fn default_user_agent() -> String {
    format!("esi-pipeline/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

impl Default for EsiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            datasource: default_datasource(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

/// Downstream indexer settings. Without a URL documents are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_indexer_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_indexer_timeout_secs() -> u64 {
    30
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: default_indexer_timeout_secs(),
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:esi-pipeline.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    4
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Directory for daily-rolled log files; console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    crate::logging::DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
            json: false,
        }
    }
}

/// Everything the binary needs to assemble a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub esi: EsiSettings,
    #[serde(default)]
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub sources: Vec<DataSource>,
}

impl AppSettings {
    /// Load settings from the environment-selected file and apply overrides.
    ///
    /// A missing file yields the defaults, which schedule nothing.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut settings = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            info!(path = %path, "Settings file not found, using defaults");
            Self::default()
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON file without applying overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("invalid settings file {}: {}", path.display(), e))
        })?;
        debug!(
            path = %path.display(),
            sources = settings.sources.len(),
            "Loaded settings file"
        );
        Ok(settings)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ESI_BASE_URL") {
            self.esi.base_url = url;
        }
        if let Some(agent) = lookup("ESI_USER_AGENT") {
            self.esi.user_agent = agent;
        }
        if let Some(url) = lookup("INDEXER_URL") {
            self.indexer.url = Some(url);
        }
        if let Some(key) = lookup("INDEXER_API_KEY") {
            self.indexer.api_key = Some(key);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// Validate the pipeline config and every source definition.
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id.as_str()) {
                return Err(Error::config(format!(
                    "duplicate data source id: {}",
                    source.id
                )));
            }
        }
        Ok(())
    }
}
