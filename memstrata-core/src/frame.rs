//! A lightweight columnar frame.
//!
//! The fabric moves tabular artifacts between tiers as JSON-valued columns:
//! warm stores them as payload rows or named tables, cold inlines them into
//! the analytical store, glacier ships them as JSON objects. The frame is
//! deliberately small (named columns over `serde_json::Value` cells) and
//! makes no attempt at being a query engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{FabricError, Result};

/// Column-major table of JSON values. `data[i]` holds the cells of
/// `columns[i]`; all columns have equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, cells)` pairs. All columns must be equally long.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self> {
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        let mut rows = None;
        for (name, cells) in columns {
            match rows {
                None => rows = Some(cells.len()),
                Some(n) if n != cells.len() => {
                    return Err(FabricError::backend_ctx(
                        "frame",
                        format!("column {name:?} has {} cells, expected {n}", cells.len()),
                    ));
                }
                _ => {}
            }
            names.push(name);
            data.push(cells);
        }
        Ok(Self { columns: names, data })
    }

    /// Build from row records. The column set is the union of all keys;
    /// missing cells become null. Column order follows first appearance.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let data = columns
            .iter()
            .map(|col| {
                records
                    .iter()
                    .map(|r| r.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, data }
    }

    /// Build from a column-oriented mapping (`{"a": [1, 2], "b": [3, 4]}`).
    /// Scalar values become single-cell columns; mixed lengths are an error.
    pub fn from_dict(dict: &Map<String, Value>) -> Result<Self> {
        let mut columns = Vec::with_capacity(dict.len());
        for (name, value) in dict {
            let cells = match value {
                Value::Array(items) => items.clone(),
                scalar => vec![scalar.clone()],
            };
            columns.push((name.clone(), cells));
        }
        Self::from_columns(columns)
    }

    /// One row, one column. Used for opaque promotions that wrap a payload.
    pub fn single_cell(column: &str, value: Value) -> Self {
        Self {
            columns: vec![column.to_string()],
            data: vec![vec![value]],
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.data.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(&self.data[idx])
    }

    /// Inferred storage type per column: `integer`, `float`, `boolean`,
    /// `text`, or `object`. Nulls are skipped; an all-null or empty column
    /// reports `object`.
    pub fn dtypes(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .zip(&self.data)
            .map(|(name, cells)| (name.clone(), infer_dtype(cells).to_string()))
            .collect()
    }

    /// Row-oriented view.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        (0..self.num_rows())
            .map(|row| {
                self.columns
                    .iter()
                    .zip(&self.data)
                    .map(|(name, cells)| (name.clone(), cells[row].clone()))
                    .collect()
            })
            .collect()
    }

    /// Serialize to the column-oriented JSON object used at rest.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (name, cells) in self.columns.iter().zip(&self.data) {
            obj.insert(name.clone(), Value::Array(cells.clone()));
        }
        json!({ "columns": self.columns, "data": obj })
    }

    /// Parse the at-rest form produced by [`DataFrame::to_json`]. A bare
    /// column mapping (without the envelope) is accepted too.
    pub fn from_json(value: &Value) -> Result<Self> {
        if let Some(obj) = value.as_object() {
            if let (Some(Value::Array(order)), Some(Value::Object(data))) =
                (obj.get("columns"), obj.get("data"))
            {
                let mut columns = Vec::with_capacity(order.len());
                for name in order {
                    let name = name.as_str().ok_or_else(|| {
                        FabricError::backend_ctx("frame", "non-string column name")
                    })?;
                    let cells = match data.get(name) {
                        Some(Value::Array(cells)) => cells.clone(),
                        _ => {
                            return Err(FabricError::backend_ctx(
                                "frame",
                                format!("missing column data for {name:?}"),
                            ))
                        }
                    };
                    columns.push((name.to_string(), cells));
                }
                return Self::from_columns(columns);
            }
            return Self::from_dict(obj);
        }
        Err(FabricError::backend_ctx("frame", "expected a JSON object"))
    }

    /// Rough in-memory footprint used for catalog size accounting.
    pub fn approx_size_bytes(&self) -> u64 {
        serde_json::to_string(&self.to_json())
            .map(|s| s.len() as u64)
            .unwrap_or(0)
    }
}

fn infer_dtype(cells: &[Value]) -> &'static str {
    let mut seen: Option<&'static str> = None;
    for cell in cells {
        let dtype = match cell {
            Value::Null => continue,
            Value::Bool(_) => "boolean",
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    "integer"
                } else {
                    "float"
                }
            }
            Value::String(_) => "text",
            Value::Array(_) | Value::Object(_) => "object",
        };
        match seen {
            None => seen = Some(dtype),
            // Integer and float mix to float; anything else mixed is object.
            Some(prev) if prev == dtype => {}
            Some("integer") if dtype == "float" => seen = Some("float"),
            Some("float") if dtype == "integer" => {}
            Some(_) => return "object",
        }
    }
    seen.unwrap_or("object")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip() {
        let records: Vec<Map<String, Value>> = vec![
            serde_json::from_value(json!({"a": 1, "b": "x"})).unwrap(),
            serde_json::from_value(json!({"a": 2, "b": "y"})).unwrap(),
        ];
        let frame = DataFrame::from_records(&records);
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.columns(), ["a", "b"]);
        assert_eq!(frame.records(), records);
    }

    #[test]
    fn from_dict_scalars_and_arrays() {
        let dict: Map<String, Value> =
            serde_json::from_value(json!({"a": [1, 2], "b": [3.5, 4.5]})).unwrap();
        let frame = DataFrame::from_dict(&dict).unwrap();
        assert_eq!(frame.num_rows(), 2);
        let dtypes = frame.dtypes();
        assert_eq!(dtypes["a"], "integer");
        assert_eq!(dtypes["b"], "float");

        let ragged: Map<String, Value> =
            serde_json::from_value(json!({"a": [1, 2], "b": [3]})).unwrap();
        assert!(DataFrame::from_dict(&ragged).is_err());
    }

    #[test]
    fn json_round_trip() {
        let frame = DataFrame::from_dict(
            &serde_json::from_value::<Map<String, Value>>(json!({"name": ["n1", "n2"], "height": [3.0, 4.0]}))
                .unwrap(),
        )
        .unwrap();
        let parsed = DataFrame::from_json(&frame.to_json()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn mixed_numeric_column_is_float() {
        let frame = DataFrame::from_columns(vec![(
            "v".into(),
            vec![json!(1), json!(2.5), Value::Null],
        )])
        .unwrap();
        assert_eq!(frame.dtypes()["v"], "float");
    }
}
