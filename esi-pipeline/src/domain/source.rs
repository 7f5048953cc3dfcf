//! Data source definition.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Priority;
use crate::esi::template;
use crate::transform::{TransformKind, ValidationRule};
use crate::{Error, Result};

/// Domain category of an upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Corporation,
    Character,
    Market,
    Universe,
    Sovereignty,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Corporation => "corporation",
            Self::Character => "character",
            Self::Market => "market",
            Self::Universe => "universe",
            Self::Sovereignty => "sovereignty",
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured, independently scheduled upstream endpoint.
///
/// This is the immutable part of a source. Schedule timestamps and the live
/// enablement flag are runtime state owned by the scheduler's registry;
/// `enabled` here is only the initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    /// Endpoint template relative to the ESI base URL, e.g. `/markets/{region_id}/orders/`.
    pub endpoint: String,
    pub category: SourceCategory,
    /// Period between scheduled runs, in minutes.
    pub update_frequency_minutes: u32,
    #[serde(default)]
    pub priority: Priority,
    /// Template placeholders and query parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub transform: Option<TransformKind>,
    #[serde(default)]
    pub validator: Option<ValidationRule>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DataSource {
    /// Create a source with default priority, no parameters and no rules.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        category: SourceCategory,
        update_frequency_minutes: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            category,
            update_frequency_minutes,
            priority: Priority::default(),
            parameters: BTreeMap::new(),
            transform: None,
            validator: None,
            enabled: true,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_transform(mut self, transform: TransformKind) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_validator(mut self, validator: ValidationRule) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Scheduling period.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_frequency_minutes) * 60)
    }

    /// Parameters serialized in key order, used as part of the cache key.
    pub fn serialized_parameters(&self) -> String {
        serde_json::to_string(&self.parameters).unwrap_or_default()
    }

    /// Check that the definition can actually be scheduled and fetched.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("data source id must not be empty"));
        }
        if self.update_frequency_minutes == 0 {
            return Err(Error::config(format!(
                "data source {}: update_frequency_minutes must be at least 1",
                self.id
            )));
        }
        if !self.endpoint.starts_with('/') {
            return Err(Error::config(format!(
                "data source {}: endpoint must start with '/', got {}",
                self.id, self.endpoint
            )));
        }
        for placeholder in template::placeholders(&self.endpoint) {
            if !self.parameters.contains_key(placeholder) {
                return Err(Error::config(format!(
                    "data source {}: endpoint placeholder {{{}}} has no parameter",
                    self.id, placeholder
                )));
            }
        }
        Ok(())
    }
}
