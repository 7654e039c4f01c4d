//! Cold memory: analytical storage for frame-shaped data.
//!
//! Two artifact families live here:
//!
//! - **Inlined frames** in the shared analytical store's
//!   `cold_data(id TEXT PRIMARY KEY, data TEXT)` table, JSON-encoded.
//! - **External file registrations**: absolute path, size and file-type
//!   suffix recorded in the catalog with `is_external = true`. The source
//!   file is opened read-only and only its footer metadata is ever read for
//!   schema description; payloads stay on disk.
//!
//! The analytical connection is owned by the memory manager and borrowed
//! here; cold must never close it. Batch import walks a directory for
//! columnar files, describes each, and registers everything in one catalog
//! transaction, accumulating per-file errors and honouring a cancellation
//! token between files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memstrata_catalog::{Catalog, CatalogEntry, Registration};
use memstrata_core::{
    ColdConfig, DataFrame, FabricError, Payload, Result, SchemaDescriptor, SchemaType, Tier,
};

/// One externally-registered file, as reported by `list_registered_files`.
#[derive(Debug, Clone)]
pub struct ColdFileInfo {
    pub data_id: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub file_path: PathBuf,
    pub data_type: String,
}

/// One retrieved inlined frame.
#[derive(Debug, Clone)]
pub struct ColdRecord {
    pub data_id: String,
    pub data: DataFrame,
    pub metadata: Value,
}

/// Report of a batch import run. Partial success is the normal outcome when
/// some files fail to describe.
#[derive(Debug, Default)]
pub struct BatchImportReport {
    pub imported: Vec<(PathBuf, String)>,
    pub errors: Vec<(PathBuf, String)>,
    pub cancelled: bool,
}

/// The cold tier.
pub struct ColdMemory {
    pool: SqlitePool,
    catalog: Arc<Catalog>,
    config: ColdConfig,
}

impl ColdMemory {
    /// Attach cold storage to the shared analytical pool.
    pub async fn attach(pool: SqlitePool, config: ColdConfig, catalog: Arc<Catalog>) -> Result<Self> {
        sqlx::query("CREATE TABLE IF NOT EXISTS cold_data (id TEXT PRIMARY KEY, data TEXT NOT NULL)")
            .execute(&pool)
            .await
            .map_err(|e| FabricError::backend_ctx("cold schema", e))?;
        info!("cold storage schema ready");
        Ok(Self { pool, catalog, config })
    }

    /// Store a frame (or a mapping convertible to one) inline.
    pub async fn store(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<String> {
        let frame = payload.into_frame()?;
        let data_id = Catalog::new_data_id();
        let size = frame.approx_size_bytes();

        sqlx::query("INSERT INTO cold_data (id, data) VALUES (?1, ?2)")
            .bind(&data_id)
            .bind(serde_json::to_string(&frame.to_json())?)
            .execute(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("cold store", e))?;

        let registration = Registration {
            tier: Tier::Cold,
            location: format!("cold_data/{data_id}"),
            size,
            data_type: "dataframe".into(),
            tags: tags.unwrap_or_default(),
            additional_meta: metadata.unwrap_or_else(|| json!({})),
        };
        if let Err(err) = self.catalog.register_with_id(&data_id, registration).await {
            let _ = sqlx::query("DELETE FROM cold_data WHERE id = ?1")
                .bind(&data_id)
                .execute(&self.pool)
                .await;
            return Err(err);
        }

        debug!(data_id, rows = frame.num_rows(), "cold stored frame");
        Ok(data_id)
    }

    /// Retrieve an inlined frame with its catalog metadata.
    pub async fn retrieve(&self, data_id: &str) -> Result<Option<ColdRecord>> {
        let row = sqlx::query("SELECT data FROM cold_data WHERE id = ?1")
            .bind(data_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("cold retrieve", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("data");
        let frame = DataFrame::from_json(&serde_json::from_str(&raw)?)?;
        let metadata = self
            .catalog
            .get(data_id)
            .await?
            .map(|entry| entry.additional_meta)
            .unwrap_or(Value::Null);
        self.catalog.touch(data_id).await.ok();
        Ok(Some(ColdRecord {
            data_id: data_id.to_string(),
            data: frame,
            metadata,
        }))
    }

    /// Record an external file in the catalog without copying its payload.
    pub async fn register_external_file(&self, path: &Path) -> Result<String> {
        if !self.config.duckdb.enable_external_access {
            return Err(FabricError::ConfigInvalid(
                "external file access is disabled for cold storage".into(),
            ));
        }
        let path = path
            .canonicalize()
            .map_err(|e| FabricError::backend_ctx("cold register", e))?;
        let stat = std::fs::metadata(&path)?;
        let data_type = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("file")
            .to_string();

        let data_id = self
            .catalog
            .register(Registration {
                tier: Tier::Cold,
                location: path.display().to_string(),
                size: stat.len(),
                data_type,
                tags: Vec::new(),
                additional_meta: json!({
                    "is_external": true,
                    "file_path": path.display().to_string(),
                }),
            })
            .await?;
        info!(data_id, path = %path.display(), "registered external file");
        Ok(data_id)
    }

    /// Drop a registration. The source file on disk is deleted only when
    /// explicitly requested.
    pub async fn unregister_file(&self, data_id: &str, delete_source: bool) -> Result<bool> {
        let entry = match self.catalog.get(data_id).await? {
            Some(entry) => entry,
            None => return Ok(false),
        };
        sqlx::query("DELETE FROM cold_data WHERE id = ?1")
            .bind(data_id)
            .execute(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("cold unregister", e))?;
        self.catalog.remove(data_id).await?;
        if delete_source && entry.is_external() {
            let path = PathBuf::from(&entry.location);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(true)
    }

    /// All external registrations.
    pub async fn list_registered_files(&self) -> Result<Vec<ColdFileInfo>> {
        let entries = self.catalog.list(Tier::Cold).await?;
        Ok(entries
            .into_iter()
            .filter(CatalogEntry::is_external)
            .map(|entry| ColdFileInfo {
                file_path: PathBuf::from(&entry.location),
                data_id: entry.data_id,
                timestamp: entry.created_at,
                size: entry.size,
                data_type: entry.data_type,
            })
            .collect())
    }

    /// Describe every external file without loading payloads. Files that
    /// fail to describe are logged and skipped.
    pub async fn get_all_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        let mut schemas = Vec::new();
        for info in self.list_registered_files().await? {
            match describe_external_file(&info.file_path, &info.data_type) {
                Ok(schema) => schemas.push(schema),
                Err(err) => {
                    warn!(path = %info.file_path.display(), "schema extraction failed: {err}");
                }
            }
        }
        Ok(schemas)
    }

    /// Schema of one artifact, inlined or external.
    pub async fn get_schema(&self, data_id: &str) -> Result<Option<SchemaDescriptor>> {
        let entry = match self.catalog.get(data_id).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.is_external() {
            return describe_external_file(Path::new(&entry.location), &entry.data_type).map(Some);
        }
        match self.retrieve(data_id).await? {
            Some(record) => Ok(Some(
                SchemaDescriptor::new(SchemaType::Dataframe, "analytics")
                    .with_fields(record.data.columns().to_vec())
                    .with_dtypes(record.data.dtypes()),
            )),
            None => Ok(None),
        }
    }

    /// Drop the analytical table and every cold catalog entry. External
    /// source files are deleted only when configured.
    pub async fn clear(&self) -> Result<()> {
        let entries = self.catalog.list(Tier::Cold).await?;
        sqlx::query("DELETE FROM cold_data")
            .execute(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("cold clear", e))?;
        for entry in &entries {
            if self.config.delete_external_on_clear && entry.is_external() {
                let path = PathBuf::from(&entry.location);
                if path.exists() {
                    if let Err(err) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), "failed to remove external file: {err}");
                    }
                }
            }
        }
        self.catalog.clear_tier(Tier::Cold).await?;
        info!("cold storage cleared");
        Ok(())
    }

    /// Recursively discover and register every parquet file under `dir`.
    /// Registrations commit in one catalog transaction; per-file description
    /// failures are accumulated. The cancellation token is checked between
    /// files.
    pub async fn batch_import(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<BatchImportReport> {
        let mut report = BatchImportReport::default();
        let mut pending: Vec<Registration> = Vec::new();
        let mut paths: Vec<PathBuf> = Vec::new();

        let mut files = Vec::new();
        collect_parquet_files(dir, &mut files)?;
        files.sort();

        for path in files {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match describe_external_file(&path, "parquet") {
                Ok(schema) => {
                    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    pending.push(Registration {
                        tier: Tier::Cold,
                        location: path.display().to_string(),
                        size,
                        data_type: "parquet".into(),
                        tags: Vec::new(),
                        additional_meta: json!({
                            "is_external": true,
                            "file_path": path.display().to_string(),
                            "columns": schema.fields,
                        }),
                    });
                    paths.push(path);
                }
                Err(err) => report.errors.push((path, err.to_string())),
            }
        }

        let ids = self.catalog.register_batch(pending).await?;
        report.imported = paths.into_iter().zip(ids).collect();
        info!(
            imported = report.imported.len(),
            failed = report.errors.len(),
            cancelled = report.cancelled,
            "batch import finished"
        );
        Ok(report)
    }
}

fn collect_parquet_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parquet_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            out.push(path);
        }
    }
    Ok(())
}

/// Describe an external file from its metadata alone. Parquet footers carry
/// the full column list; other file types get a bare file descriptor.
fn describe_external_file(path: &Path, data_type: &str) -> Result<SchemaDescriptor> {
    if data_type == "parquet" || path.extension().and_then(|e| e.to_str()) == Some("parquet") {
        let (fields, dtypes, rows) = parquet_schema(path)?;
        return Ok(SchemaDescriptor::new(SchemaType::File, "parquet")
            .with_fields(fields)
            .with_dtypes(dtypes)
            .with_detail("file_path", json!(path.display().to_string()))
            .with_detail("row_count", json!(rows)));
    }
    Ok(SchemaDescriptor::new(SchemaType::File, "file")
        .with_detail("file_path", json!(path.display().to_string())))
}

/// Read column names and types from a parquet footer without touching row
/// data.
fn parquet_schema(path: &Path) -> Result<(Vec<String>, BTreeMap<String, String>, i64)> {
    let file = std::fs::File::open(path)?;
    let reader =
        SerializedFileReader::new(file).map_err(|e| FabricError::backend_ctx("parquet", e))?;
    let metadata = reader.metadata().file_metadata();
    let schema = metadata.schema_descr();

    let mut fields = Vec::with_capacity(schema.num_columns());
    let mut dtypes = BTreeMap::new();
    for column in schema.columns() {
        let name = column.name().to_string();
        dtypes.insert(name.clone(), physical_type_name(column.physical_type()));
        fields.push(name);
    }
    Ok((fields, dtypes, metadata.num_rows()))
}

fn physical_type_name(physical: parquet::basic::Type) -> String {
    use parquet::basic::Type;
    match physical {
        Type::BOOLEAN => "boolean",
        Type::INT32 => "integer",
        Type::INT64 => "bigint",
        Type::INT96 => "timestamp",
        Type::FLOAT => "float",
        Type::DOUBLE => "double",
        Type::BYTE_ARRAY => "text",
        Type::FIXED_LEN_BYTE_ARRAY => "binary",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn cold() -> (tempfile::TempDir, ColdMemory) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(&dir.path().join("catalog")).await.unwrap());
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("cold.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        let cold = ColdMemory::attach(pool, ColdConfig::default(), catalog)
            .await
            .unwrap();
        (dir, cold)
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn write_parquet(path: &Path) {
        use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
        use parquet::file::properties::WriterProperties;
        use parquet::file::writer::SerializedFileWriter;
        use parquet::schema::parser::parse_message_type;

        let schema = Arc::new(
            parse_message_type(
                "message rows { required binary name (UTF8); required double height; }",
            )
            .unwrap(),
        );
        let file = std::fs::File::create(path).unwrap();
        let mut writer =
            SerializedFileWriter::new(file, schema, Arc::new(WriterProperties::builder().build()))
                .unwrap();
        let mut group = writer.next_row_group().unwrap();

        let mut names = group.next_column().unwrap().unwrap();
        names
            .typed::<ByteArrayType>()
            .write_batch(
                &[ByteArray::from("n1"), ByteArray::from("n2"), ByteArray::from("n3")],
                None,
                None,
            )
            .unwrap();
        names.close().unwrap();

        let mut heights = group.next_column().unwrap().unwrap();
        heights
            .typed::<DoubleType>()
            .write_batch(&[1.5, 2.5, 3.5], None, None)
            .unwrap();
        heights.close().unwrap();

        group.close().unwrap();
        writer.close().unwrap();
    }

    #[tokio::test]
    async fn store_and_retrieve_frame() {
        let (_dir, cold) = cold().await;
        let data_id = cold
            .store(
                Payload::Map(map(json!({"a": [1, 2, 3]}))),
                Some(json!({"origin": "test"})),
                None,
            )
            .await
            .unwrap();

        let record = cold.retrieve(&data_id).await.unwrap().unwrap();
        assert_eq!(record.data.column("a").unwrap().len(), 3);
        assert_eq!(record.metadata["origin"], json!("test"));

        let schema = cold.get_schema(&data_id).await.unwrap().unwrap();
        assert_eq!(schema.type_tag, SchemaType::Dataframe);
        assert_eq!(schema.fields, vec!["a"]);
    }

    #[tokio::test]
    async fn text_payloads_are_rejected() {
        let (_dir, cold) = cold().await;
        assert!(cold
            .store(Payload::Text("nope".into()), None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn external_parquet_registration_and_schema() {
        let (dir, cold) = cold().await;
        let parquet_path = dir.path().join("f.parquet");
        write_parquet(&parquet_path);

        let data_id = cold.register_external_file(&parquet_path).await.unwrap();

        let files = cold.list_registered_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_path.canonicalize().unwrap(), parquet_path.canonicalize().unwrap());
        assert!(files[0].size > 0);

        let schema = cold.get_schema(&data_id).await.unwrap().unwrap();
        assert_eq!(schema.fields, vec!["name", "height"]);
        assert_eq!(schema.dtypes["height"], "double");
        assert_eq!(schema.details["row_count"], json!(3));
    }

    #[tokio::test]
    async fn unregister_keeps_source_by_default() {
        let (dir, cold) = cold().await;
        let parquet_path = dir.path().join("keep.parquet");
        write_parquet(&parquet_path);
        let data_id = cold.register_external_file(&parquet_path).await.unwrap();

        assert!(cold.unregister_file(&data_id, false).await.unwrap());
        assert!(parquet_path.exists());
        assert!(cold.list_registered_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_import_accumulates_errors() {
        let (dir, cold) = cold().await;
        let data_dir = dir.path().join("lake");
        std::fs::create_dir_all(data_dir.join("nested")).unwrap();
        write_parquet(&data_dir.join("good.parquet"));
        write_parquet(&data_dir.join("nested").join("deep.parquet"));
        std::fs::write(data_dir.join("bad.parquet"), b"not parquet").unwrap();

        let report = cold
            .batch_import(&data_dir, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.cancelled);
        assert_eq!(cold.list_registered_files().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_batch_import_registers_nothing_new() {
        let (dir, cold) = cold().await;
        let data_dir = dir.path().join("lake");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_parquet(&data_dir.join("a.parquet"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = cold.batch_import(&data_dir, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.imported.is_empty());
    }

    #[tokio::test]
    async fn clear_preserves_external_files_by_default() {
        let (dir, cold) = cold().await;
        let parquet_path = dir.path().join("survivor.parquet");
        write_parquet(&parquet_path);
        cold.register_external_file(&parquet_path).await.unwrap();
        cold.store(Payload::Map(map(json!({"a": [1]}))), None, None)
            .await
            .unwrap();

        cold.clear().await.unwrap();
        assert!(parquet_path.exists());
        assert!(cold.list_registered_files().await.unwrap().is_empty());
    }
}
