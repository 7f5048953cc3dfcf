//! Source-specific payload shaping and integrity checks.

mod enrich;
mod validate;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use validate::ValidationRule;

use crate::domain::SourceCategory;

/// Raised when a payload does not have the shape its transform expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Which enricher a source's payload runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Corporation,
    Character,
    Market,
    Universe,
    Sovereignty,
}

impl TransformKind {
    pub fn for_category(category: SourceCategory) -> Self {
        match category {
            SourceCategory::Corporation => Self::Corporation,
            SourceCategory::Character => Self::Character,
            SourceCategory::Market => Self::Market,
            SourceCategory::Universe => Self::Universe,
            SourceCategory::Sovereignty => Self::Sovereignty,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Corporation => "corporation",
            Self::Character => "character",
            Self::Market => "market",
            Self::Universe => "universe",
            Self::Sovereignty => "sovereignty",
        }
    }

    /// Enrich a payload. Arrays are enriched element by element.
    ///
    /// Scalar elements are passed through unchanged for universe payloads,
    /// which include plain id lists; every other category requires objects.
    pub fn apply(&self, payload: Value) -> Result<Value, TransformError> {
        match payload {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    self.apply_record(item)
                        .map_err(|e| TransformError(format!("record {}: {}", index, e)))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => self.apply_record(other).map_err(TransformError),
        }
    }

    fn apply_record(&self, value: Value) -> Result<Value, String> {
        let mut record = match value {
            Value::Object(map) => map,
            other if *self == Self::Universe => return Ok(other),
            other => {
                return Err(format!(
                    "{} transform expects objects, got {}",
                    self.as_str(),
                    other
                ));
            }
        };

        match self {
            Self::Market => enrich::market(&mut record)?,
            Self::Corporation => enrich::corporation(&mut record)?,
            Self::Character => enrich::character(&mut record, Utc::now())?,
            Self::Universe => enrich::universe(&mut record)?,
            Self::Sovereignty => enrich::sovereignty(&mut record)?,
        }
        Ok(Value::Object(record))
    }
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of records in a payload: array length, else one.
pub fn record_count(payload: &Value) -> usize {
    match payload {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_array() {
        let payload = json!([
            {"system_id": 30000142, "security_status": 0.95},
            {"system_id": 30002187, "security_status": 0.1}
        ]);
        let out = TransformKind::Universe.apply(payload).unwrap();
        assert_eq!(out[0]["security_class"], "highsec");
        assert_eq!(out[1]["security_class"], "lowsec");
    }

    #[test]
    fn test_universe_passes_scalars() {
        let payload = json!([30000142, 30000144]);
        let out = TransformKind::Universe.apply(payload.clone()).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_error_names_record() {
        let payload = json!([
            {"price": 5.0, "volume_remain": 1, "volume_total": 1},
            {"type_id": 34}
        ]);
        let err = TransformKind::Market.apply(payload).unwrap_err();
        assert!(err.0.starts_with("record 1:"));

        let err = TransformKind::Corporation.apply(json!("text")).unwrap_err();
        assert!(err.0.contains("expects objects"));
    }

    #[test]
    fn test_for_category_and_serde() {
        assert_eq!(
            TransformKind::for_category(SourceCategory::Sovereignty),
            TransformKind::Sovereignty
        );
        let kind: TransformKind = serde_json::from_str("\"market\"").unwrap();
        assert_eq!(kind, TransformKind::Market);
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(&json!([1, 2, 3])), 3);
        assert_eq!(record_count(&json!({"a": 1})), 1);
        assert_eq!(record_count(&Value::Null), 0);
    }
}
