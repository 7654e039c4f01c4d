//! Schema descriptors for semantic discovery.
//!
//! Every tier can describe its artifacts with a compact descriptor; the
//! schema index vectorises these and answers natural-language queries about
//! where relevant data lives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structural family of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    Dataframe,
    Dict,
    ListOfDicts,
    Geodataframe,
    Table,
    File,
    Vector,
    Unknown,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Dataframe => "dataframe",
            SchemaType::Dict => "dict",
            SchemaType::ListOfDicts => "list_of_dicts",
            SchemaType::Geodataframe => "geodataframe",
            SchemaType::Table => "table",
            SchemaType::File => "file",
            SchemaType::Vector => "vector",
            SchemaType::Unknown => "unknown",
        }
    }
}

/// Compact description of an artifact's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Column or field names, in declaration order.
    pub fields: Vec<String>,

    /// Field name → inferred storage type.
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,

    #[serde(rename = "type")]
    pub type_tag: SchemaType,

    /// Engine or tier that produced the descriptor.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    /// Source-specific extras (vector dimension, row counts, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl SchemaDescriptor {
    pub fn new(type_tag: SchemaType, source: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            dtypes: BTreeMap::new(),
            type_tag,
            source: source.into(),
            geometry_type: None,
            crs: None,
            details: Map::new(),
        }
    }

    /// Sentinel for artifacts whose tier cannot produce a schema.
    pub fn unknown(source: impl Into<String>) -> Self {
        Self::new(SchemaType::Unknown, source)
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_dtypes(mut self, dtypes: BTreeMap<String, String>) -> Self {
        self.dtypes = dtypes;
        self
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Text fed to the encoder: field names, then `type:<t>`, `source:<s>`,
    /// and `geometry:<g>` when present, space-joined. Empty descriptors
    /// vectorise as the literal `empty_schema`.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<String> = self.fields.clone();
        parts.push(format!("type:{}", self.type_tag.as_str()));
        parts.push(format!("source:{}", self.source));
        if let Some(geometry) = &self.geometry_type {
            parts.push(format!("geometry:{geometry}"));
        }
        if parts.is_empty() {
            "empty_schema".to_string()
        } else {
            parts.join(" ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_layout() {
        let schema = SchemaDescriptor::new(SchemaType::Dataframe, "analytics")
            .with_fields(vec!["name".into(), "height".into()]);
        assert_eq!(
            schema.embedding_text(),
            "name height type:dataframe source:analytics"
        );
    }

    #[test]
    fn geometry_is_appended() {
        let mut schema = SchemaDescriptor::new(SchemaType::Geodataframe, "warm");
        schema.geometry_type = Some("polygon".into());
        assert!(schema.embedding_text().ends_with("geometry:polygon"));
    }
}
