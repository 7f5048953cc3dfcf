//! Payload to downstream document conversion.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DataSource;

/// Fields that identify a single record, most specific first.
const ID_FIELDS: &[&str] = &[
    "order_id",
    "contract_id",
    "killmail_id",
    "kill_id",
    "character_id",
    "corporation_id",
    "alliance_id",
    "system_id",
    "solar_system_id",
    "type_id",
];

/// Identifiers copied into document metadata when present.
const DOMAIN_ID_FIELDS: &[&str] = &[
    "type_id",
    "location_id",
    "system_id",
    "solar_system_id",
    "region_id",
    "constellation_id",
    "station_id",
    "corporation_id",
    "character_id",
    "alliance_id",
    "faction_id",
];

/// A record in the shape the downstream indexer accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn record_id(record: &Value) -> Option<String> {
    let map = record.as_object()?;
    ID_FIELDS
        .iter()
        .find_map(|field| map.get(*field).and_then(id_to_string))
}

fn base_metadata(source: &DataSource, timestamp: DateTime<Utc>) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("source_id".to_string(), Value::from(source.id.as_str()));
    metadata.insert("source_name".to_string(), Value::from(source.name.as_str()));
    metadata.insert("category".to_string(), Value::from(source.category.as_str()));
    metadata.insert("endpoint".to_string(), Value::from(source.endpoint.as_str()));
    metadata.insert("timestamp".to_string(), Value::from(timestamp.to_rfc3339()));
    metadata
}

fn copy_domain_ids(record: &Value, metadata: &mut BTreeMap<String, Value>) {
    if let Some(map) = record.as_object() {
        for field in DOMAIN_ID_FIELDS {
            if let Some(value) = map.get(*field).filter(|v| !v.is_null()) {
                metadata.insert((*field).to_string(), value.clone());
            }
        }
    }
}

/// Convert a payload into documents: one per element of an array, else one.
///
/// Ids are stable across re-ingestion when a record carries a well-known id,
/// so re-forwarding upserts instead of duplicating.
pub fn documents_from_payload(
    source: &DataSource,
    payload: &Value,
    timestamp: DateTime<Utc>,
) -> Vec<Document> {
    let build = |record: &Value, index: usize, fallback_id: Option<String>| {
        let mut metadata = base_metadata(source, timestamp);
        copy_domain_ids(record, &mut metadata);

        let id = record_id(record)
            .or(fallback_id)
            .map(|id| format!("{}:{}", source.id, id))
            .unwrap_or_else(|| {
                format!("{}:{}:{}", source.id, timestamp.timestamp_millis(), index)
            });

        Document {
            id,
            content: record.to_string(),
            metadata,
        }
    };

    match payload {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| build(item, index, None))
            .collect(),
        Value::Null => Vec::new(),
        single => {
            // A single-object endpoint is usually addressed by its parameters.
            let fallback = ID_FIELDS
                .iter()
                .find_map(|field| source.parameters.get(*field).and_then(id_to_string));
            let mut document = build(single, 0, fallback);
            for field in DOMAIN_ID_FIELDS {
                if let Some(value) = source.parameters.get(*field) {
                    document
                        .metadata
                        .entry((*field).to_string())
                        .or_insert_with(|| value.clone());
                }
            }
            vec![document]
        }
    }
}
