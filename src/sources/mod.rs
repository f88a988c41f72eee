//! Upstream record shapes and the mapping from raw JSON documents.
//!
//! Upstreams return loosely-typed arrays. Each source maps the first
//! [`MAX_RECORDS`] elements into its own shape, substituting fallbacks only for
//! missing or `null` fields.

use crate::error::{DashboardError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped upstream payload
pub type RawDocument = Value;

/// Records kept per source
pub const MAX_RECORDS: usize = 5;

/// A read-only upstream with a typed record shape
pub trait UpstreamSource {
    type Item: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Label used for circuit state, cache keys and partial errors
    const LABEL: &'static str;

    /// Map one raw record; `index` is the record's position in the payload
    fn map_record(record: &Map<String, Value>, index: usize) -> Self::Item;

    /// Map a raw document, keeping the first [`MAX_RECORDS`] records
    fn map_document(raw: &RawDocument) -> Result<Vec<Self::Item>> {
        let records = raw.as_array().ok_or_else(|| DashboardError::Mapping {
            source_label: Self::LABEL.to_string(),
            message: format!("expected a JSON array, got {}", json_kind(raw)),
        })?;

        let empty = Map::new();
        Ok(records
            .iter()
            .take(MAX_RECORDS)
            .enumerate()
            .map(|(index, record)| Self::map_record(record.as_object().unwrap_or(&empty), index))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coffee {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beer {
    pub id: String,
    pub name: String,
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub species: Option<String>,
}

pub struct Coffees;
pub struct Beers;
pub struct Characters;

impl UpstreamSource for Coffees {
    type Item = Coffee;
    const LABEL: &'static str = "coffees";

    fn map_record(record: &Map<String, Value>, index: usize) -> Coffee {
        Coffee {
            id: field(record, "id")
                .or_else(|| field(record, "title"))
                .unwrap_or_else(|| index.to_string()),
            title: field(record, "title")
                .or_else(|| field(record, "name"))
                .unwrap_or_else(|| "Unknown coffee".to_string()),
        }
    }
}

impl UpstreamSource for Beers {
    type Item = Beer;
    const LABEL: &'static str = "beers";

    fn map_record(record: &Map<String, Value>, index: usize) -> Beer {
        Beer {
            id: field(record, "id")
                .or_else(|| field(record, "name"))
                .unwrap_or_else(|| index.to_string()),
            name: field(record, "name").unwrap_or_else(|| "Unknown beer".to_string()),
            style: field(record, "style").or_else(|| field(record, "type")),
        }
    }
}

impl UpstreamSource for Characters {
    type Item = Character;
    const LABEL: &'static str = "characters";

    fn map_record(record: &Map<String, Value>, index: usize) -> Character {
        Character {
            id: field(record, "id")
                .or_else(|| field(record, "name"))
                .unwrap_or_else(|| index.to_string()),
            name: field(record, "name").unwrap_or_else(|| "Unknown".to_string()),
            species: field(record, "species"),
        }
    }
}

/// A field as text. Missing and `null` are absent; other scalars are
/// stringified and structured values keep their JSON form.
fn field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
