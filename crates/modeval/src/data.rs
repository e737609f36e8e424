//! Input normalization and dot-path access.
//!
//! Whatever shape the caller hands to a session, it is normalized once into a
//! [`DataRecord`], which is then the single source of truth for the run.
//! Objects describe what they can produce through [`SourceObject`]; the
//! caller wraps them in the [`DataSource`] variant that says how they should
//! be read.

use crate::error::{Result, ValidationError};
use crate::session::Mode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Capabilities an object may expose for validation.
///
/// Every capability defaults to "not available".
pub trait SourceObject: Send + Sync {
    /// Full key-value view of the object.
    fn to_map(&self) -> Option<Map<String, Value>> {
        None
    }

    /// JSON document of the object. Must decode to a JSON object.
    fn to_json(&self) -> Option<String> {
        None
    }

    /// Only the attributes modified since the object was loaded.
    fn changed_attributes(&self) -> Option<Map<String, Value>> {
        None
    }

    /// Raw attribute map, used when nothing better is available.
    fn attributes(&self) -> Option<Map<String, Value>> {
        None
    }
}

/// Input handed to a session.
#[derive(Clone)]
pub enum DataSource {
    /// A key-value map, used as-is.
    Map(Map<String, Value>),
    /// A JSON value; must be an object.
    Json(Value),
    /// An object whose changed attributes are validated in update mode.
    ChangeSet(Arc<dyn SourceObject>),
    /// An object read through its map, JSON or attribute view, in that order.
    Reflected(Arc<dyn SourceObject>),
}

impl DataSource {
    /// Wrap an object so that update runs only see its changed attributes.
    pub fn changes(object: impl SourceObject + 'static) -> Self {
        Self::ChangeSet(Arc::new(object))
    }

    /// Wrap an object read through its full views.
    pub fn object(object: impl SourceObject + 'static) -> Self {
        Self::Reflected(Arc::new(object))
    }

    /// Serialize any value into a JSON source.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| ValidationError::UnsupportedDataShape(e.to_string()))
    }
}

impl From<Map<String, Value>> for DataSource {
    fn from(map: Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl From<Value> for DataSource {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<DataRecord> for DataSource {
    fn from(record: DataRecord) -> Self {
        Self::Map(record.values)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::ChangeSet(_) => f.write_str("ChangeSet(..)"),
            Self::Reflected(_) => f.write_str("Reflected(..)"),
        }
    }
}

/// Normalize a source into a record.
///
/// In update mode a [`DataSource::ChangeSet`] yields only the changed
/// attributes when the object can report them.
pub fn normalize(source: &DataSource, mode: Mode) -> Result<DataRecord> {
    match source {
        DataSource::Map(map) => Ok(DataRecord::from(map.clone())),
        DataSource::Json(Value::Object(map)) => Ok(DataRecord::from(map.clone())),
        DataSource::Json(other) => Err(ValidationError::UnsupportedDataShape(format!(
            "expected a JSON object, got {}",
            kind(other)
        ))),
        DataSource::ChangeSet(object) => {
            if mode == Mode::Update {
                if let Some(changed) = object.changed_attributes() {
                    return Ok(DataRecord::from(changed));
                }
            }
            reflect(object.as_ref())
        }
        DataSource::Reflected(object) => reflect(object.as_ref()),
    }
}

fn reflect(object: &dyn SourceObject) -> Result<DataRecord> {
    if let Some(map) = object.to_map() {
        return Ok(DataRecord::from(map));
    }

    if let Some(json) = object.to_json() {
        return match serde_json::from_str::<Value>(&json) {
            Ok(Value::Object(map)) => Ok(DataRecord::from(map)),
            Ok(other) => Err(ValidationError::UnsupportedDataShape(format!(
                "JSON conversion produced {}",
                kind(&other)
            ))),
            Err(e) => Err(ValidationError::UnsupportedDataShape(format!(
                "JSON conversion failed: {e}"
            ))),
        };
    }

    object.attributes().map(DataRecord::from).ok_or_else(|| {
        ValidationError::UnsupportedDataShape(
            "source exposes no map, JSON or attribute view".to_string(),
        )
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Flat or nested key-value data, addressable with dot paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRecord {
    values: Map<String, Value>,
}

impl DataRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value at `path`.
    ///
    /// A literal key containing dots wins over a nested lookup.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Value at `path`, or `default` when absent at any level.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    /// Whether `path` is present, whatever its value.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Whether `path` holds a truthy value.
    ///
    /// Absent values, `null`, `false`, `0`, `""`, `"0"` and empty
    /// collections are falsy.
    pub fn has(&self, path: &str) -> bool {
        match self.get(path) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty() && s != "0",
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
        }
    }

    /// Set the value at `path`, creating intermediate maps as needed.
    ///
    /// Non-map values standing in the way are replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or(path);

        let mut current = &mut self.values;
        for segment in segments {
            let slot = current
                .entry(segment.to_string())
                .or_insert(Value::Null);
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value.into());
    }

    /// Merge `other` into this record.
    ///
    /// Maps merge recursively, arrays are concatenated and any other
    /// incoming value replaces the existing one.
    pub fn merge(&mut self, other: impl Into<DataRecord>) {
        merge_maps(&mut self.values, other.into().values);
    }

    /// Top-level keys, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record holds no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Take the underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        let replacement = match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_maps(existing, nested);
                None
            }
            (Some(Value::Array(existing)), Value::Array(items)) => {
                existing.extend(items);
                None
            }
            (_, value) => Some(value),
        };
        if let Some(value) = replacement {
            target.insert(key, value);
        }
    }
}

impl From<Map<String, Value>> for DataRecord {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
