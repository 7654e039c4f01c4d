//! Payload sum type accepted at the fabric boundary.
//!
//! Callers hand the dispatchers one of a closed set of shapes; each tier then
//! coerces at its own boundary and rejects impossible conversions explicitly
//! instead of guessing.

use serde_json::{Map, Value};

use crate::error::{FabricError, Result};
use crate::frame::DataFrame;

/// A storable artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON object.
    Map(Map<String, Value>),
    /// JSON array of arbitrary values.
    Sequence(Vec<Value>),
    /// Dense f32 vector destined for red-hot memory.
    Array(Vec<f32>),
    /// Columnar table.
    Frame(DataFrame),
    /// Opaque binary blob.
    Bytes(Vec<u8>),
    /// Plain text.
    Text(String),
}

impl Payload {
    /// Free-form type tag recorded in the catalog.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Payload::Map(_) => "dict",
            Payload::Sequence(_) => "list",
            Payload::Array(_) => "vector",
            Payload::Frame(_) => "dataframe",
            Payload::Bytes(_) => "blob",
            Payload::Text(_) => "text",
        }
    }

    /// Whether the payload is structured (JSON-encodable without escaping).
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            Payload::Map(_) | Payload::Sequence(_) | Payload::Frame(_) | Payload::Array(_)
        )
    }

    /// View as a dense f32 vector. Sequences of numbers coerce; anything
    /// else is `None`.
    pub fn as_vector(&self) -> Option<Vec<f32>> {
        match self {
            Payload::Array(v) => Some(v.clone()),
            Payload::Sequence(values) => values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>(),
            _ => None,
        }
    }

    /// JSON form used for hot and glacier storage. Bytes are not
    /// JSON-encodable and are rejected here; glacier handles them raw.
    pub fn to_json_value(&self) -> Result<Value> {
        match self {
            Payload::Map(m) => Ok(Value::Object(m.clone())),
            Payload::Sequence(s) => Ok(Value::Array(s.clone())),
            Payload::Array(v) => Ok(Value::Array(
                v.iter().map(|f| Value::from(*f as f64)).collect(),
            )),
            Payload::Frame(f) => Ok(f.to_json()),
            Payload::Text(t) => Ok(Value::String(t.clone())),
            Payload::Bytes(_) => Err(FabricError::backend_ctx(
                "payload",
                "binary payloads have no JSON form",
            )),
        }
    }

    /// Classify a JSON value back into a payload.
    pub fn from_json_value(value: Value) -> Self {
        match value {
            Value::Object(m) => Payload::Map(m),
            Value::Array(items) => Payload::Sequence(items),
            Value::String(s) => Payload::Text(s),
            other => Payload::Sequence(vec![other]),
        }
    }

    /// Coerce into a frame for the analytical tiers. Maps go through the
    /// column-oriented constructor; sequences of objects become record rows;
    /// anything else is rejected.
    pub fn into_frame(self) -> Result<DataFrame> {
        match self {
            Payload::Frame(f) => Ok(f),
            Payload::Map(m) => DataFrame::from_dict(&m),
            Payload::Sequence(items) => {
                let records: Option<Vec<Map<String, Value>>> = items
                    .iter()
                    .map(|v| v.as_object().cloned())
                    .collect();
                match records {
                    Some(records) if !records.is_empty() => Ok(DataFrame::from_records(&records)),
                    _ => Err(FabricError::backend_ctx(
                        "payload",
                        "sequence is not convertible to a frame",
                    )),
                }
            }
            other => Err(FabricError::backend_ctx(
                "payload",
                format!("{} payload is not convertible to a frame", other.type_tag()),
            )),
        }
    }

    /// Rough footprint for catalog size accounting.
    pub fn approx_size_bytes(&self) -> u64 {
        match self {
            Payload::Bytes(b) => b.len() as u64,
            Payload::Text(t) => t.len() as u64,
            Payload::Array(v) => (v.len() * std::mem::size_of::<f32>()) as u64,
            Payload::Frame(f) => f.approx_size_bytes(),
            Payload::Map(_) | Payload::Sequence(_) => self
                .to_json_value()
                .ok()
                .and_then(|v| serde_json::to_string(&v).ok())
                .map(|s| s.len() as u64)
                .unwrap_or(0),
        }
    }
}

impl From<DataFrame> for Payload {
    fn from(frame: DataFrame) -> Self {
        Payload::Frame(frame)
    }
}

impl From<Vec<f32>> for Payload {
    fn from(vector: Vec<f32>) -> Self {
        Payload::Array(vector)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Map(map)
    }
}
