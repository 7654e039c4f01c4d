//! Read-only external data sources.
//!
//! Domain connectors (satellite catalogues, map extracts, building
//! footprints, geocoders) are pluggable: the fabric fixes only the factory
//! and lookup contract here and never interprets their payloads. The kind
//! set is closed, so unknown names are errors, and providers register a
//! builder per kind. A filesystem-backed source ships built in for tests and
//! offline work.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use memstrata_core::{DataFrame, FabricError, Result, SchemaDescriptor, SchemaType};

/// Closed set of data-source kinds the factory recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    Sentinel,
    Landsat,
    Planetary,
    Osm,
    Overture,
    Local,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::Sentinel => "sentinel",
            DataSourceKind::Landsat => "landsat",
            DataSourceKind::Planetary => "planetary",
            DataSourceKind::Osm => "osm",
            DataSourceKind::Overture => "overture",
            DataSourceKind::Local => "local",
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceKind {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentinel" => Ok(DataSourceKind::Sentinel),
            "landsat" => Ok(DataSourceKind::Landsat),
            "planetary" => Ok(DataSourceKind::Planetary),
            "osm" => Ok(DataSourceKind::Osm),
            "overture" => Ok(DataSourceKind::Overture),
            "local" => Ok(DataSourceKind::Local),
            other => Err(FabricError::ConnectorUnknown(other.to_string())),
        }
    }
}

/// Spatial addressing modes a source may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialInputKind {
    /// `[min_lon, min_lat, max_lon, max_lat]`
    Bbox,
    /// `[lon, lat]`
    Point,
    Polygon,
    Address,
}

impl FromStr for SpatialInputKind {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bbox" => Ok(SpatialInputKind::Bbox),
            "point" => Ok(SpatialInputKind::Point),
            "polygon" => Ok(SpatialInputKind::Polygon),
            "address" => Ok(SpatialInputKind::Address),
            other => Err(FabricError::UnsupportedSpatialInput(other.to_string())),
        }
    }
}

/// One read-only external data source.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Describe what a named dataset of this source looks like for the given
    /// spatial scope.
    async fn get_schema(
        &self,
        source: &str,
        spatial_input: &Value,
        spatial_input_type: SpatialInputKind,
    ) -> Result<SchemaDescriptor>;

    /// Fetch rows for the given spatial (and optional temporal) scope.
    async fn fetch(
        &self,
        source: &str,
        spatial_input: &Value,
        spatial_input_type: SpatialInputKind,
        temporal_input: Option<(String, String)>,
    ) -> Result<DataFrame>;

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

type SourceBuilder = Box<dyn Fn(&Path) -> Result<Arc<dyn DataSource>> + Send + Sync>;

/// Factory and cache of data-source instances, one per kind.
pub struct DataSourceRegistry {
    builders: HashMap<DataSourceKind, SourceBuilder>,
    instances: tokio::sync::RwLock<HashMap<DataSourceKind, Arc<dyn DataSource>>>,
}

impl DataSourceRegistry {
    /// Registry with the built-in filesystem source. Hosts register builders
    /// for the remote kinds they ship providers for.
    pub fn new() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
            instances: tokio::sync::RwLock::new(HashMap::new()),
        };
        registry.register_builder(DataSourceKind::Local, |dir| {
            Ok(Arc::new(LocalDataSource::new(dir)?) as Arc<dyn DataSource>)
        });
        registry
    }

    /// Install a builder for one kind, replacing any previous one.
    pub fn register_builder(
        &mut self,
        kind: DataSourceKind,
        builder: impl Fn(&Path) -> Result<Arc<dyn DataSource>> + Send + Sync + 'static,
    ) {
        self.builders.insert(kind, Box::new(builder));
    }

    /// Hand out the connector for a kind, constructing it on first use with
    /// its data directory. A known kind without a registered provider is a
    /// configuration error; an unknown kind never reaches here because
    /// [`DataSourceKind::from_str`] rejects it.
    pub async fn get(&self, kind: DataSourceKind, data_dir: &Path) -> Result<Arc<dyn DataSource>> {
        if let Some(instance) = self.instances.read().await.get(&kind) {
            return Ok(instance.clone());
        }
        let builder = self.builders.get(&kind).ok_or_else(|| {
            FabricError::ConfigInvalid(format!("no provider registered for data source {kind}"))
        })?;
        let instance = builder(data_dir)?;
        self.instances.write().await.insert(kind, instance.clone());
        debug!(kind = %kind, "data source constructed");
        Ok(instance)
    }

    pub async fn cleanup(&self) -> Result<()> {
        for (_, instance) in self.instances.write().await.drain() {
            instance.cleanup().await?;
        }
        Ok(())
    }
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Filesystem-backed data source: each dataset is a JSON file of row records
/// under the source's data directory. Supports bbox and point filtering on
/// `lon`/`lat` columns.
pub struct LocalDataSource {
    root: PathBuf,
}

impl LocalDataSource {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self { root: root.to_path_buf() })
    }

    fn load(&self, source: &str) -> Result<Vec<Map<String, Value>>> {
        let path = self.root.join(format!("{source}.json"));
        if !path.exists() {
            return Err(FabricError::UnknownSource(source.to_string()));
        }
        let value: Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        match value {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect()),
            _ => Err(FabricError::backend_ctx(
                "local source",
                format!("{source}.json is not an array of records"),
            )),
        }
    }
}

#[async_trait]
impl DataSource for LocalDataSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_schema(
        &self,
        source: &str,
        _spatial_input: &Value,
        _spatial_input_type: SpatialInputKind,
    ) -> Result<SchemaDescriptor> {
        let records = self.load(source)?;
        let frame = DataFrame::from_records(&records);
        Ok(SchemaDescriptor::new(SchemaType::Table, "local")
            .with_fields(frame.columns().to_vec())
            .with_dtypes(frame.dtypes()))
    }

    async fn fetch(
        &self,
        source: &str,
        spatial_input: &Value,
        spatial_input_type: SpatialInputKind,
        _temporal_input: Option<(String, String)>,
    ) -> Result<DataFrame> {
        let mut records = self.load(source)?;
        match spatial_input_type {
            SpatialInputKind::Bbox => {
                if let Some(bbox) = as_f64_array(spatial_input, 4) {
                    records.retain(|r| {
                        match (coord(r, "lon"), coord(r, "lat")) {
                            (Some(lon), Some(lat)) => {
                                lon >= bbox[0] && lat >= bbox[1] && lon <= bbox[2] && lat <= bbox[3]
                            }
                            // Rows without coordinates stay in scope.
                            _ => true,
                        }
                    });
                }
            }
            SpatialInputKind::Point | SpatialInputKind::Polygon | SpatialInputKind::Address => {}
        }
        Ok(DataFrame::from_records(&records))
    }
}

fn as_f64_array(value: &Value, len: usize) -> Option<Vec<f64>> {
    let items = value.as_array()?;
    if items.len() != len {
        return None;
    }
    items.iter().map(Value::as_f64).collect()
}

fn coord(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        assert!(matches!(
            "mars_rover".parse::<DataSourceKind>(),
            Err(FabricError::ConnectorUnknown(_))
        ));
        assert!(matches!(
            "orbit".parse::<SpatialInputKind>(),
            Err(FabricError::UnsupportedSpatialInput(_))
        ));
    }

    #[tokio::test]
    async fn registry_serves_local_source() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DataSourceRegistry::new();
        let source = registry
            .get(DataSourceKind::Local, dir.path())
            .await
            .unwrap();
        assert_eq!(source.name(), "local");

        // Instances are cached per kind.
        let again = registry.get(DataSourceKind::Local, dir.path()).await.unwrap();
        assert!(Arc::ptr_eq(&source, &again));
    }

    #[tokio::test]
    async fn unregistered_kind_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DataSourceRegistry::new();
        assert!(matches!(
            registry.get(DataSourceKind::Sentinel, dir.path()).await,
            Err(FabricError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn local_source_schema_and_bbox_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("buildings.json"),
            serde_json::to_vec(&json!([
                {"name": "tower", "height": 120.0, "lon": 55.27, "lat": 25.19},
                {"name": "shed", "height": 3.0, "lon": 10.0, "lat": 50.0},
            ]))
            .unwrap(),
        )
        .unwrap();

        let source = LocalDataSource::new(dir.path()).unwrap();
        let schema = source
            .get_schema("buildings", &Value::Null, SpatialInputKind::Bbox)
            .await
            .unwrap();
        assert!(schema.fields.contains(&"height".to_string()));

        let frame = source
            .fetch(
                "buildings",
                &json!([55.0, 25.0, 56.0, 26.0]),
                SpatialInputKind::Bbox,
                None,
            )
            .await
            .unwrap();
        assert_eq!(frame.num_rows(), 1);
        assert_eq!(frame.column("name").unwrap(), &[json!("tower")]);

        assert!(matches!(
            source
                .fetch("missing", &Value::Null, SpatialInputKind::Bbox, None)
                .await,
            Err(FabricError::UnknownSource(_))
        ));
    }
}
