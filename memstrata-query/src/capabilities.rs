//! Advisory query-capability inference.
//!
//! Given an artifact's column names, guess which query families it supports
//! and attach example templates. This is metadata for agents choosing where
//! to send a query, not enforcement.

use serde::Serialize;

const SPATIAL_TOKENS: [&str; 8] = [
    "geom", "geometry", "point", "polygon", "location", "coordinate", "lat", "lon",
];
const TEXT_TOKENS: [&str; 5] = ["name", "title", "description", "text", "comment"];
const TIME_TOKENS: [&str; 5] = ["time", "date", "timestamp", "created", "updated"];
const NUMERIC_TOKENS: [&str; 8] = [
    "id", "count", "amount", "value", "number", "total", "sum", "price",
];

/// One example query shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTemplate {
    pub kind: String,
    pub example: String,
}

/// Which query families an artifact's columns suggest.
#[derive(Debug, Clone, Serialize)]
pub struct QueryCapabilities {
    pub supports_filtering: bool,
    pub supports_aggregation: bool,
    pub spatial_query: bool,
    pub text_search: bool,
    pub time_series: bool,
    pub potential_queries: Vec<QueryTemplate>,
}

/// Infer capabilities from column names.
pub fn infer_query_capabilities(columns: &[String]) -> QueryCapabilities {
    let mut capabilities = QueryCapabilities {
        supports_filtering: true,
        supports_aggregation: true,
        spatial_query: false,
        text_search: false,
        time_series: false,
        potential_queries: Vec::new(),
    };

    if let Some(column) = first_matching(columns, &SPATIAL_TOKENS) {
        capabilities.spatial_query = true;
        capabilities.potential_queries.push(QueryTemplate {
            kind: "spatial".into(),
            example: format!(
                "SELECT * FROM table WHERE ST_Within(ST_GeomFromWKB({column}), \
                 ST_MakeEnvelope(min_lon, min_lat, max_lon, max_lat))"
            ),
        });
    }

    if let Some(column) = first_matching(columns, &TEXT_TOKENS) {
        capabilities.text_search = true;
        capabilities.potential_queries.push(QueryTemplate {
            kind: "text_search".into(),
            example: format!("SELECT * FROM table WHERE {column} LIKE '%search_term%'"),
        });
    }

    if let Some(column) = first_matching(columns, &TIME_TOKENS) {
        capabilities.time_series = true;
        capabilities.potential_queries.push(QueryTemplate {
            kind: "time_series".into(),
            example: format!("SELECT * FROM table WHERE {column} BETWEEN start_date AND end_date"),
        });
    }

    if let Some(first) = columns.first() {
        capabilities.potential_queries.push(QueryTemplate {
            kind: "filtering".into(),
            example: format!("SELECT * FROM table WHERE {first} = 'value'"),
        });
    }

    if let Some(column) = first_matching(columns, &NUMERIC_TOKENS) {
        let group_by = columns.first().map(String::as_str).unwrap_or("column");
        capabilities.potential_queries.push(QueryTemplate {
            kind: "aggregation".into(),
            example: format!("SELECT AVG({column}) FROM table GROUP BY {group_by}"),
        });
    }

    capabilities
}

fn first_matching<'a>(columns: &'a [String], tokens: &[&str]) -> Option<&'a String> {
    columns.iter().find(|column| {
        let lowered = column.to_ascii_lowercase();
        tokens.iter().any(|token| lowered.contains(token))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spatial_columns_trigger_spatial_capability() {
        let caps = infer_query_capabilities(&columns(&["geometry", "height"]));
        assert!(caps.spatial_query);
        assert!(!caps.text_search);
        assert!(caps.potential_queries.iter().any(|q| q.kind == "spatial"));
    }

    #[test]
    fn mixed_columns_trigger_multiple_capabilities() {
        let caps = infer_query_capabilities(&columns(&["name", "created_at", "price", "lat"]));
        assert!(caps.spatial_query);
        assert!(caps.text_search);
        assert!(caps.time_series);
        let kinds: Vec<&str> = caps
            .potential_queries
            .iter()
            .map(|q| q.kind.as_str())
            .collect();
        assert!(kinds.contains(&"aggregation"));
        assert!(kinds.contains(&"filtering"));
    }

    #[test]
    fn empty_columns_suggest_nothing_specific() {
        let caps = infer_query_capabilities(&[]);
        assert!(!caps.spatial_query);
        assert!(caps.potential_queries.is_empty());
    }
}
