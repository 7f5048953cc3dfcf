//! Payload validation rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Integrity check applied to a payload before it is transformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Not null, not an empty array, not an empty object.
    NonEmpty,
    /// An array with at least `min_items` elements.
    Array {
        #[serde(default)]
        min_items: usize,
    },
    Object,
    /// Every record (each element of an array, or the object itself) carries the fields.
    RequiredFields { fields: Vec<String> },
    AllOf { rules: Vec<ValidationRule> },
}

impl ValidationRule {
    pub fn required_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RequiredFields {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check a payload, returning a description of the first violation.
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        match self {
            Self::NonEmpty => {
                let empty = match payload {
                    Value::Null => true,
                    Value::Array(items) => items.is_empty(),
                    Value::Object(map) => map.is_empty(),
                    _ => false,
                };
                if empty {
                    Err("payload is empty".to_string())
                } else {
                    Ok(())
                }
            }
            Self::Array { min_items } => match payload {
                Value::Array(items) if items.len() >= *min_items => Ok(()),
                Value::Array(items) => Err(format!(
                    "expected at least {} items, got {}",
                    min_items,
                    items.len()
                )),
                other => Err(format!("expected an array, got {}", kind_of(other))),
            },
            Self::Object => match payload {
                Value::Object(_) => Ok(()),
                other => Err(format!("expected an object, got {}", kind_of(other))),
            },
            Self::RequiredFields { fields } => {
                let records: Vec<&Value> = match payload {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for (index, record) in records.iter().enumerate() {
                    let Value::Object(map) = record else {
                        return Err(format!(
                            "record {} is {}, not an object",
                            index,
                            kind_of(record)
                        ));
                    };
                    if let Some(missing) = fields.iter().find(|f| !map.contains_key(f.as_str())) {
                        return Err(format!("record {} is missing field '{}'", index, missing));
                    }
                }
                Ok(())
            }
            Self::AllOf { rules } => rules.iter().try_for_each(|rule| rule.validate(payload)),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
