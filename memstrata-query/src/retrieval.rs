//! The cross-cutting retrieval dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use memstrata_catalog::Catalog;
use memstrata_core::{DataFrame, FabricError, Result, Tier};
use memstrata_glacier::{DataSourceKind, DataSourceRegistry, GlacierMemory, SpatialInputKind};
use memstrata_tiers::{ColdMemory, HotMemory, RedHotMemory, WarmMemory};

/// What a retrieval produced. Glacier data sources return frames; local
/// tiers return record lists.
#[derive(Debug, Clone)]
pub enum RetrievalResult {
    Frame(DataFrame),
    Records(Vec<Value>),
    Empty,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        match self {
            RetrievalResult::Frame(f) => f.is_empty(),
            RetrievalResult::Records(r) => r.is_empty(),
            RetrievalResult::Empty => true,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RetrievalResult::Frame(f) => f.num_rows(),
            RetrievalResult::Records(r) => r.len(),
            RetrievalResult::Empty => 0,
        }
    }
}

/// Reads across tiers. For glacier the dispatch key is `source`
/// (`<kind>/<dataset>`, e.g. `local/buildings`); for the other tiers reads
/// filter on tags and, optionally, a spatial bounding box and a temporal
/// window.
pub struct MemoryRetrieval {
    catalog: Arc<Catalog>,
    red_hot: Arc<RedHotMemory>,
    hot: Arc<HotMemory>,
    warm: Arc<WarmMemory>,
    cold: Arc<ColdMemory>,
    #[allow(dead_code)]
    glacier: Arc<GlacierMemory>,
    sources: Arc<DataSourceRegistry>,
    sources_dir: PathBuf,
}

impl MemoryRetrieval {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        red_hot: Arc<RedHotMemory>,
        hot: Arc<HotMemory>,
        warm: Arc<WarmMemory>,
        cold: Arc<ColdMemory>,
        glacier: Arc<GlacierMemory>,
        sources: Arc<DataSourceRegistry>,
        sources_dir: PathBuf,
    ) -> Self {
        Self { catalog, red_hot, hot, warm, cold, glacier, sources, sources_dir }
    }

    /// Retrieve from a tier.
    ///
    /// Tag filters default to the empty set: an absent filter matches
    /// everything and never indexes into missing state.
    pub async fn retrieve(
        &self,
        from_tier: &str,
        source: Option<&str>,
        spatial_input_type: Option<&str>,
        spatial_input: Option<&Value>,
        tags: Option<&[String]>,
        temporal_input: Option<(String, String)>,
    ) -> Result<RetrievalResult> {
        let tier: Tier = from_tier.parse()?;
        let tags: Vec<String> = tags.map(|t| t.to_vec()).unwrap_or_default();
        debug!(tier = %tier, tags = tags.len(), "retrieve");

        match tier {
            Tier::Glacier => {
                self.retrieve_from_glacier(source, spatial_input_type, spatial_input, temporal_input)
                    .await
            }
            Tier::RedHot => self.retrieve_entries(Tier::RedHot, &tags).await,
            Tier::Hot => self.retrieve_from_hot(&tags, spatial_input_type, spatial_input).await,
            Tier::Warm => self.retrieve_from_warm(&tags, spatial_input_type, spatial_input).await,
            Tier::Cold => self.retrieve_from_cold(&tags, spatial_input_type, spatial_input).await,
        }
    }

    async fn retrieve_from_glacier(
        &self,
        source: Option<&str>,
        spatial_input_type: Option<&str>,
        spatial_input: Option<&Value>,
        temporal_input: Option<(String, String)>,
    ) -> Result<RetrievalResult> {
        let source = source.ok_or_else(|| {
            FabricError::UnknownSource("glacier retrieval requires a source".into())
        })?;
        let (kind_name, dataset) = source.split_once('/').unwrap_or((source, ""));
        let kind: DataSourceKind = kind_name
            .parse()
            .map_err(|_| FabricError::UnknownSource(kind_name.to_string()))?;
        let spatial_kind: SpatialInputKind = spatial_input_type.unwrap_or("bbox").parse()?;

        let connector = self
            .sources
            .get(kind, &self.sources_dir.join(kind.as_str()))
            .await?;
        let frame = connector
            .fetch(
                dataset,
                spatial_input.unwrap_or(&Value::Null),
                spatial_kind,
                temporal_input,
            )
            .await?;
        Ok(RetrievalResult::Frame(frame))
    }

    /// Catalog-entry view used for tiers addressed by opaque keys.
    async fn retrieve_entries(&self, tier: Tier, tags: &[String]) -> Result<RetrievalResult> {
        let mut records = Vec::new();
        for entry in self.catalog.list(tier).await? {
            if !tags.iter().all(|t| entry.tags.contains(t)) {
                continue;
            }
            if tier == Tier::RedHot {
                // Skip tombstones.
                if let Some(record) = self.red_hot.record(&entry.location).await {
                    if record.deleted {
                        continue;
                    }
                }
            }
            self.catalog.touch(&entry.data_id).await.ok();
            records.push(json!({
                "data_id": entry.data_id,
                "location": entry.location,
                "data_type": entry.data_type,
                "tags": entry.tags,
                "metadata": entry.additional_meta,
            }));
        }
        if records.is_empty() {
            return Ok(RetrievalResult::Empty);
        }
        Ok(RetrievalResult::Records(records))
    }

    async fn retrieve_from_hot(
        &self,
        tags: &[String],
        spatial_input_type: Option<&str>,
        spatial_input: Option<&Value>,
    ) -> Result<RetrievalResult> {
        let bbox = parse_bbox(spatial_input_type, spatial_input)?;
        let mut records = Vec::new();
        for entry in self.catalog.list(Tier::Hot).await? {
            if !tags.iter().all(|t| entry.tags.contains(t)) {
                continue;
            }
            if let Some(value) = self.hot.read(&entry.location).await? {
                if within_bbox(value.get("data").unwrap_or(&value), bbox.as_deref()) {
                    self.catalog.touch(&entry.data_id).await.ok();
                    records.push(value);
                }
            }
        }
        if records.is_empty() {
            return Ok(RetrievalResult::Empty);
        }
        Ok(RetrievalResult::Records(records))
    }

    async fn retrieve_from_warm(
        &self,
        tags: &[String],
        spatial_input_type: Option<&str>,
        spatial_input: Option<&Value>,
    ) -> Result<RetrievalResult> {
        let bbox = parse_bbox(spatial_input_type, spatial_input)?;
        let tag_filter = if tags.is_empty() { None } else { Some(tags) };
        let rows = self.warm.retrieve(tag_filter, None, None).await?;
        let records: Vec<Value> = rows
            .into_iter()
            .filter(|r| within_bbox(&r.data, bbox.as_deref()))
            .map(|r| {
                json!({
                    "data": r.data,
                    "metadata": r.metadata,
                    "tags": r.tags,
                    "stored_at": r.stored_at,
                })
            })
            .collect();
        if records.is_empty() {
            return Ok(RetrievalResult::Empty);
        }
        Ok(RetrievalResult::Records(records))
    }

    async fn retrieve_from_cold(
        &self,
        tags: &[String],
        spatial_input_type: Option<&str>,
        spatial_input: Option<&Value>,
    ) -> Result<RetrievalResult> {
        let bbox = parse_bbox(spatial_input_type, spatial_input)?;
        let mut records = Vec::new();
        for entry in self.catalog.list(Tier::Cold).await? {
            if entry.is_external() {
                continue;
            }
            if !tags.iter().all(|t| entry.tags.contains(t)) {
                continue;
            }
            if let Some(record) = self.cold.retrieve(&entry.data_id).await? {
                for row in record.data.records() {
                    let row = Value::Object(row);
                    if within_bbox(&row, bbox.as_deref()) {
                        records.push(row);
                    }
                }
            }
        }
        if records.is_empty() {
            return Ok(RetrievalResult::Empty);
        }
        Ok(RetrievalResult::Records(records))
    }
}

/// `[min_lon, min_lat, max_lon, max_lat]` when a bbox filter applies.
fn parse_bbox(
    spatial_input_type: Option<&str>,
    spatial_input: Option<&Value>,
) -> Result<Option<Vec<f64>>> {
    let Some(input) = spatial_input else {
        return Ok(None);
    };
    let kind: SpatialInputKind = spatial_input_type.unwrap_or("bbox").parse()?;
    if kind != SpatialInputKind::Bbox {
        return Ok(None);
    }
    let bounds: Option<Vec<f64>> = input
        .as_array()
        .filter(|a| a.len() == 4)
        .map(|a| a.iter().filter_map(Value::as_f64).collect());
    Ok(bounds.filter(|b| b.len() == 4))
}

fn within_bbox(record: &Value, bbox: Option<&[f64]>) -> bool {
    let Some(bbox) = bbox else {
        return true;
    };
    let lon = coordinate(record, &["lon", "longitude", "lng"]);
    let lat = coordinate(record, &["lat", "latitude"]);
    match (lon, lat) {
        (Some(lon), Some(lat)) => {
            lon >= bbox[0] && lat >= bbox[1] && lon <= bbox[2] && lat <= bbox[3]
        }
        // Records without coordinates are not excluded by a spatial filter.
        _ => true,
    }
}

fn coordinate(record: &Value, names: &[&str]) -> Option<f64> {
    let map: &Map<String, Value> = record.as_object()?;
    names.iter().find_map(|n| map.get(*n).and_then(Value::as_f64))
}
