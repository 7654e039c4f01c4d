//! Warm memory: named relational databases with tags and schemas.
//!
//! Every warm database is one SQLite file under the warm directory, holding
//! the primary record table, its tag table, and any user-imported tables:
//!
//! ```sql
//! warm_data(id TEXT PRIMARY KEY, data TEXT, metadata TEXT, stored_at TEXT)
//! warm_tags(data_id TEXT REFERENCES warm_data(id), tag TEXT)
//! -- user-imported tables live alongside with arbitrary schemas
//! ```
//!
//! Tag rows commit in the same transaction as their record, so a record
//! without its tags (or an orphan tag) cannot be observed. The two fixed
//! table names are reserved; user tables must not collide with them. A
//! connection pool is kept per database name.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use memstrata_catalog::{Catalog, Registration};
use memstrata_core::{
    AnalyticsSettings, DataFrame, FabricError, Payload, Result, SchemaDescriptor, SchemaType, Tier,
};

const DEFAULT_DB: &str = "default";
const RESERVED_TABLES: [&str; 2] = ["warm_data", "warm_tags"];

/// Tag prefix directing a frame into its own named table instead of a JSON
/// payload row.
const TABLE_TAG_PREFIX: &str = "table:";

/// Outcome of a warm store or single-table import.
#[derive(Debug, Clone)]
pub struct WarmStoreOutcome {
    pub data_id: String,
    /// `warm_data` for payload rows, the user table name otherwise.
    pub table_name: String,
    /// Catalog location, `<db_name>/<data_id-or-table>`.
    pub location: String,
}

/// Outcome of a whole-database import.
#[derive(Debug, Clone, Default)]
pub struct WarmImportOutcome {
    pub imported_tables: Vec<String>,
    pub data_ids: Vec<String>,
    /// Per-table failures; the import continues past them.
    pub errors: Vec<(String, String)>,
}

/// One retrieved warm record.
#[derive(Debug, Clone)]
pub struct WarmRecord {
    pub data_id: String,
    pub data: Value,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub stored_at: String,
}

/// The warm tier.
pub struct WarmMemory {
    root: PathBuf,
    settings: AnalyticsSettings,
    catalog: Arc<Catalog>,
    pools: RwLock<HashMap<String, SqlitePool>>,
}

impl WarmMemory {
    pub async fn open(
        root: &Path,
        settings: AnalyticsSettings,
        catalog: Arc<Catalog>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| FabricError::backend_ctx("warm mkdir", e))?;
        Ok(Self {
            root: root.to_path_buf(),
            settings,
            catalog,
            pools: RwLock::new(HashMap::new()),
        })
    }

    /// Get or create the pool for a named database.
    async fn pool(&self, db_name: &str) -> Result<SqlitePool> {
        let db_name = sanitize_identifier(db_name)?;
        if let Some(pool) = self.pools.read().await.get(&db_name) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&db_name) {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(self.root.join(format!("{db_name}.db")))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.settings.threads.max(1))
            .connect_with(options)
            .await
            .map_err(|e| FabricError::backend_ctx("warm open", e))?;

        // The analytical memory limit maps onto the page cache.
        let cache_kib = (self.settings.memory_limit_bytes() / 1024).max(2048);
        sqlx::query(&format!("PRAGMA cache_size = -{cache_kib}"))
            .execute(&pool)
            .await
            .map_err(|e| FabricError::backend_ctx("warm pragma", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS warm_data (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                metadata TEXT,
                stored_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| FabricError::backend_ctx("warm schema", e))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS warm_tags (
                data_id TEXT NOT NULL REFERENCES warm_data(id),
                tag TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| FabricError::backend_ctx("warm schema", e))?;

        info!(db = %db_name, "warm database ready");
        pools.insert(db_name.clone(), pool.clone());
        Ok(pool)
    }

    /// Store a payload. Non-frame payloads always become a JSON payload row;
    /// a frame goes to its own table when a `table:<name>` tag directs it
    /// there, otherwise it is stored as a payload row too.
    pub async fn store(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
        db_name: Option<&str>,
    ) -> Result<WarmStoreOutcome> {
        let db = db_name.unwrap_or(DEFAULT_DB);
        let pool = self.pool(db).await?;
        let tags = tags.unwrap_or_default();
        let table_directive = tags
            .iter()
            .find_map(|t| t.strip_prefix(TABLE_TAG_PREFIX))
            .map(str::to_string);
        let plain_tags: Vec<String> = tags
            .iter()
            .filter(|t| !t.starts_with(TABLE_TAG_PREFIX))
            .cloned()
            .collect();

        let data_id = Catalog::new_data_id();
        let size = payload.approx_size_bytes();
        let data_type = payload.type_tag().to_string();

        let (record_data, table_name) = match (&payload, table_directive) {
            (Payload::Frame(frame), Some(name)) => {
                let table = sanitize_identifier(&name)?;
                create_table_from_frame(&pool, &table, frame).await?;
                (json!({ "table_name": table }), table)
            }
            _ => (payload.to_json_value()?, "warm_data".to_string()),
        };

        self.insert_record(&pool, &data_id, &record_data, metadata.as_ref(), &plain_tags)
            .await?;

        let location = if table_name == "warm_data" {
            format!("{db}/{data_id}")
        } else {
            format!("{db}/{table_name}")
        };
        let registration = Registration {
            tier: Tier::Warm,
            location: location.clone(),
            size,
            data_type: if table_name == "warm_data" { data_type } else { "table".into() },
            tags: plain_tags.clone(),
            additional_meta: json!({ "db_name": db, "table_name": table_name }),
        };
        if let Err(err) = self.catalog.register_with_id(&data_id, registration).await {
            // Roll the tier write back so catalog and tier stay consistent.
            let _ = self.remove_record(&pool, &data_id).await;
            return Err(err);
        }

        debug!(db, data_id, table = %table_name, "warm stored");
        Ok(WarmStoreOutcome { data_id, table_name, location })
    }

    async fn insert_record(
        &self,
        pool: &SqlitePool,
        data_id: &str,
        data: &Value,
        metadata: Option<&Value>,
        tags: &[String],
    ) -> Result<()> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("warm store", e))?;
        sqlx::query("INSERT INTO warm_data (id, data, metadata, stored_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(data_id)
            .bind(serde_json::to_string(data)?)
            .bind(metadata.map(serde_json::to_string).transpose()?)
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("warm store", e))?;
        for tag in tags {
            sqlx::query("INSERT INTO warm_tags (data_id, tag) VALUES (?1, ?2)")
                .bind(data_id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(|e| FabricError::backend_ctx("warm store", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("warm store", e))
    }

    async fn remove_record(&self, pool: &SqlitePool, data_id: &str) -> Result<()> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("warm delete", e))?;
        sqlx::query("DELETE FROM warm_tags WHERE data_id = ?1")
            .bind(data_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("warm delete", e))?;
        sqlx::query("DELETE FROM warm_data WHERE id = ?1")
            .bind(data_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("warm delete", e))?;
        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("warm delete", e))
    }

    /// Retrieve records by tags and optional equality filters, newest first.
    /// An empty tag set matches every record. `query` keys are matched
    /// against the record data first, then its metadata.
    pub async fn retrieve(
        &self,
        tags: Option<&[String]>,
        query: Option<&Map<String, Value>>,
        db_name: Option<&str>,
    ) -> Result<Vec<WarmRecord>> {
        let pool = self.pool(db_name.unwrap_or(DEFAULT_DB)).await?;
        // Tag filters normalise to the empty set before any membership test.
        let tags: Vec<String> = tags.map(|t| t.to_vec()).unwrap_or_default();

        let rows: Vec<SqliteRow> = if tags.is_empty() {
            sqlx::query("SELECT * FROM warm_data ORDER BY stored_at DESC, rowid DESC")
                .fetch_all(&pool)
                .await
                .map_err(|e| FabricError::backend_ctx("warm retrieve", e))?
        } else {
            let placeholders: Vec<String> =
                (1..=tags.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT * FROM warm_data w
                 WHERE EXISTS (SELECT 1 FROM warm_tags t
                               WHERE t.data_id = w.id AND t.tag IN ({}))
                 ORDER BY w.stored_at DESC, w.rowid DESC",
                placeholders.join(", ")
            );
            let mut q = sqlx::query(&sql);
            for tag in &tags {
                q = q.bind(tag);
            }
            q.fetch_all(&pool)
                .await
                .map_err(|e| FabricError::backend_ctx("warm retrieve", e))?
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = self.record_from_row(&pool, row).await?;
            if let Some(filter) = query {
                if !matches_filter(&record, filter) {
                    continue;
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Fetch one record by id.
    pub async fn retrieve_by_id(
        &self,
        data_id: &str,
        db_name: Option<&str>,
    ) -> Result<Option<WarmRecord>> {
        let pool = self.pool(db_name.unwrap_or(DEFAULT_DB)).await?;
        let row = sqlx::query("SELECT * FROM warm_data WHERE id = ?1")
            .bind(data_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| FabricError::backend_ctx("warm retrieve", e))?;
        match row {
            Some(row) => Ok(Some(self.record_from_row(&pool, &row).await?)),
            None => Ok(None),
        }
    }

    /// Load a user table as a frame.
    pub async fn retrieve_table(&self, table: &str, db_name: Option<&str>) -> Result<DataFrame> {
        let pool = self.pool(db_name.unwrap_or(DEFAULT_DB)).await?;
        let table = sanitize_identifier(table)?;
        let rows = sqlx::query(&format!("SELECT * FROM \"{table}\""))
            .fetch_all(&pool)
            .await
            .map_err(|e| FabricError::backend_ctx("warm table", e))?;
        Ok(frame_from_rows(&rows))
    }

    async fn record_from_row(&self, pool: &SqlitePool, row: &SqliteRow) -> Result<WarmRecord> {
        let data_id: String = row.get("id");
        let data: String = row.get("data");
        let metadata: Option<String> = row.get("metadata");
        let stored_at: String = row.get("stored_at");

        let tag_rows = sqlx::query("SELECT tag FROM warm_tags WHERE data_id = ?1 ORDER BY tag")
            .bind(&data_id)
            .fetch_all(pool)
            .await
            .map_err(|e| FabricError::backend_ctx("warm tags", e))?;

        Ok(WarmRecord {
            data: serde_json::from_str(&data)?,
            metadata: metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()?
                .unwrap_or(Value::Null),
            tags: tag_rows.iter().map(|r| r.get::<String, _>("tag")).collect(),
            stored_at,
            data_id,
        })
    }

    /// Delete one record (and its table, for table-backed records).
    pub async fn delete(&self, data_id: &str, db_name: Option<&str>) -> Result<bool> {
        let db = db_name.unwrap_or(DEFAULT_DB);
        let pool = self.pool(db).await?;
        let record = self.retrieve_by_id(data_id, Some(db)).await?;
        let record = match record {
            Some(r) => r,
            None => return Ok(false),
        };
        if let Some(table) = record.data.get("table_name").and_then(Value::as_str) {
            let table = sanitize_identifier(table)?;
            sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
                .execute(&pool)
                .await
                .map_err(|e| FabricError::backend_ctx("warm drop", e))?;
        }
        self.remove_record(&pool, data_id).await?;
        self.catalog.remove(data_id).await?;
        Ok(true)
    }

    /// Truncate one database, or every known database when `None`. Tags drop
    /// in lock-step with records, user tables are dropped, and the catalog
    /// entries of the affected databases are removed.
    pub async fn clear(&self, db_name: Option<&str>) -> Result<()> {
        let targets = match db_name {
            Some(db) => vec![db.to_string()],
            None => self.list_databases().await?,
        };
        for db in targets {
            let pool = self.pool(&db).await?;
            for table in user_tables(&pool).await? {
                sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
                    .execute(&pool)
                    .await
                    .map_err(|e| FabricError::backend_ctx("warm clear", e))?;
            }
            let mut tx = pool
                .begin()
                .await
                .map_err(|e| FabricError::backend_ctx("warm clear", e))?;
            sqlx::query("DELETE FROM warm_tags")
                .execute(&mut *tx)
                .await
                .map_err(|e| FabricError::backend_ctx("warm clear", e))?;
            sqlx::query("DELETE FROM warm_data")
                .execute(&mut *tx)
                .await
                .map_err(|e| FabricError::backend_ctx("warm clear", e))?;
            tx.commit()
                .await
                .map_err(|e| FabricError::backend_ctx("warm clear", e))?;

            // Catalog entries for this database are keyed by location prefix.
            for entry in self.catalog.list(Tier::Warm).await? {
                if entry.location.starts_with(&format!("{db}/")) {
                    self.catalog.remove(&entry.data_id).await?;
                }
            }
            info!(db, "warm database cleared");
        }
        Ok(())
    }

    /// Known database names: every `.db` file on disk plus any pool opened
    /// this session.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| FabricError::backend_ctx("warm list", e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FabricError::backend_ctx("warm list", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("db") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        for name in self.pools.read().await.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Schema of a stored record: a table description for table-backed
    /// records, a payload-shape description otherwise.
    pub async fn get_schema(
        &self,
        data_id: &str,
        db_name: Option<&str>,
    ) -> Result<Option<SchemaDescriptor>> {
        let db = db_name.unwrap_or(DEFAULT_DB);
        let record = match self.retrieve_by_id(data_id, Some(db)).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        if let Some(table) = record.data.get("table_name").and_then(Value::as_str) {
            let pool = self.pool(db).await?;
            let (fields, dtypes) = table_schema(&pool, table).await?;
            return Ok(Some(
                SchemaDescriptor::new(SchemaType::Table, "warm")
                    .with_fields(fields)
                    .with_dtypes(dtypes),
            ));
        }

        Ok(Some(describe_payload_json(&record.data)))
    }

    /// Import a CSV file as its own table, with a companion primary record
    /// carrying metadata and the table name.
    pub async fn import_from_csv(
        &self,
        path: &Path,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
        db_name: Option<&str>,
    ) -> Result<WarmStoreOutcome> {
        let frame = read_csv(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| FabricError::backend_ctx("csv import", "file has no stem"))?;

        let mut tags = tags.unwrap_or_default();
        if !tags.iter().any(|t| t.starts_with(TABLE_TAG_PREFIX)) {
            tags.push(format!("{TABLE_TAG_PREFIX}{stem}"));
        }

        let mut meta = match metadata {
            Some(Value::Object(m)) => m,
            Some(other) => {
                let mut m = Map::new();
                m.insert("metadata".into(), other);
                m
            }
            None => Map::new(),
        };
        meta.insert("source_file".into(), json!(path.display().to_string()));

        self.store(
            Payload::Frame(frame),
            Some(Value::Object(meta)),
            Some(tags),
            db_name,
        )
        .await
    }

    /// Copy tables wholesale from another SQLite database. Each imported
    /// table gets its own primary record and tag rows; per-table failures are
    /// accumulated and do not abort the rest of the import.
    pub async fn import_from_database(
        &self,
        source_db_path: &Path,
        tables: Option<&[String]>,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
        db_name: Option<&str>,
    ) -> Result<WarmImportOutcome> {
        let options = SqliteConnectOptions::new()
            .filename(source_db_path)
            .read_only(true);
        let source = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| FabricError::backend_ctx("import open", e))?;

        let available = user_tables(&source).await?;
        let selected: Vec<String> = match tables {
            Some(requested) => requested.to_vec(),
            None => available.clone(),
        };

        let mut outcome = WarmImportOutcome::default();
        for table in selected {
            if !available.contains(&table) {
                outcome
                    .errors
                    .push((table.clone(), "table not present in source".into()));
                continue;
            }
            match self
                .import_one_table(&source, &table, metadata.clone(), tags.clone(), db_name)
                .await
            {
                Ok(result) => {
                    outcome.imported_tables.push(result.table_name);
                    outcome.data_ids.push(result.data_id);
                }
                Err(err) => {
                    warn!(table, "table import failed: {err}");
                    outcome.errors.push((table, err.to_string()));
                }
            }
        }
        source.close().await;
        Ok(outcome)
    }

    async fn import_one_table(
        &self,
        source: &SqlitePool,
        table: &str,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
        db_name: Option<&str>,
    ) -> Result<WarmStoreOutcome> {
        let table = sanitize_identifier(table)?;
        let rows = sqlx::query(&format!("SELECT * FROM \"{table}\""))
            .fetch_all(source)
            .await
            .map_err(|e| FabricError::backend_ctx("import read", e))?;
        let frame = frame_from_rows(&rows);

        let mut tags = tags.unwrap_or_default();
        tags.retain(|t| !t.starts_with(TABLE_TAG_PREFIX));
        tags.push(format!("{TABLE_TAG_PREFIX}{table}"));

        self.store(Payload::Frame(frame), metadata, Some(tags), db_name)
            .await
    }

    /// Close all pools.
    pub async fn close(&self) {
        for (_, pool) in self.pools.write().await.drain() {
            pool.close().await;
        }
    }
}

fn matches_filter(record: &WarmRecord, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| {
        record.data.get(key) == Some(expected) || record.metadata.get(key) == Some(expected)
    })
}

/// Identifier whitelist shared by table and database names. Rejects reserved
/// names and anything that could smuggle quoting into SQL.
fn sanitize_identifier(name: &str) -> Result<String> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
    {
        return Err(FabricError::backend_ctx(
            "identifier",
            format!("invalid identifier {name:?}"),
        ));
    }
    if RESERVED_TABLES.contains(&name) {
        return Err(FabricError::backend_ctx(
            "identifier",
            format!("{name:?} is a reserved table name"),
        ));
    }
    Ok(name.to_string())
}

async fn user_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
           AND name NOT IN ('warm_data', 'warm_tags')
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| FabricError::backend_ctx("warm tables", e))?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

async fn table_schema(
    pool: &SqlitePool,
    table: &str,
) -> Result<(Vec<String>, BTreeMap<String, String>)> {
    let table = sanitize_identifier(table)?;
    let rows = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
        .fetch_all(pool)
        .await
        .map_err(|e| FabricError::backend_ctx("warm schema", e))?;
    let mut fields = Vec::with_capacity(rows.len());
    let mut dtypes = BTreeMap::new();
    for row in &rows {
        let name: String = row.get("name");
        let dtype: String = row.get("type");
        dtypes.insert(name.clone(), dtype.to_ascii_lowercase());
        fields.push(name);
    }
    Ok((fields, dtypes))
}

async fn create_table_from_frame(pool: &SqlitePool, table: &str, frame: &DataFrame) -> Result<()> {
    let dtypes = frame.dtypes();
    let column_defs: Vec<String> = frame
        .columns()
        .iter()
        .map(|name| format!("\"{}\" {}", name, sql_type(dtypes.get(name).map(String::as_str))))
        .collect();
    if column_defs.is_empty() {
        return Err(FabricError::backend_ctx("warm table", "frame has no columns"));
    }

    sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
        .execute(pool)
        .await
        .map_err(|e| FabricError::backend_ctx("warm table", e))?;
    sqlx::query(&format!(
        "CREATE TABLE \"{table}\" ({})",
        column_defs.join(", ")
    ))
    .execute(pool)
    .await
    .map_err(|e| FabricError::backend_ctx("warm table", e))?;

    let placeholders: Vec<String> = (1..=frame.num_columns()).map(|i| format!("?{i}")).collect();
    let insert_sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        frame
            .columns()
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    );

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| FabricError::backend_ctx("warm table", e))?;
    for record in frame.records() {
        let mut query = sqlx::query(&insert_sql);
        for column in frame.columns() {
            query = bind_json(query, record.get(column).unwrap_or(&Value::Null))?;
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("warm table", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| FabricError::backend_ctx("warm table", e))
}

fn sql_type(dtype: Option<&str>) -> &'static str {
    match dtype {
        Some("integer") | Some("boolean") => "INTEGER",
        Some("float") => "REAL",
        _ => "TEXT",
    }
}

type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> Result<SqliteQuery<'q>> {
    Ok(match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(serde_json::to_string(other)?),
    })
}

/// Decode a result set into a frame, trying integer, float, text and blob in
/// that order per cell.
fn frame_from_rows(rows: &[SqliteRow]) -> DataFrame {
    let Some(first) = rows.first() else {
        return DataFrame::new();
    };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let records: Vec<Map<String, Value>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), decode_cell(row, idx)))
                .collect()
        })
        .collect();
    DataFrame::from_records(&records)
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Value {
    use sqlx::TypeInfo;

    // Decode by declared column affinity so REAL cells are not truncated by
    // the integer coercion SQLite would otherwise apply.
    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
            .unwrap_or(Value::Null),
        _ => match row.try_get::<Option<String>, _>(idx) {
            // Structured cells were stored as JSON text; decode them back.
            Ok(Some(text)) => serde_json::from_str(&text)
                .ok()
                .filter(|v: &Value| v.is_object() || v.is_array())
                .unwrap_or(Value::String(text)),
            _ => Value::Null,
        },
    }
}

fn describe_payload_json(data: &Value) -> SchemaDescriptor {
    match data {
        Value::Object(map) => {
            // A frame envelope carries explicit column order.
            if let (Some(Value::Array(_)), Some(Value::Object(_))) =
                (map.get("columns"), map.get("data"))
            {
                if let Ok(frame) = DataFrame::from_json(data) {
                    return SchemaDescriptor::new(SchemaType::Dataframe, "warm")
                        .with_fields(frame.columns().to_vec())
                        .with_dtypes(frame.dtypes());
                }
            }
            SchemaDescriptor::new(SchemaType::Dict, "warm")
                .with_fields(map.keys().cloned().collect())
        }
        Value::Array(items) if items.iter().all(|v| v.is_object()) && !items.is_empty() => {
            let mut fields: Vec<String> = Vec::new();
            for item in items {
                if let Some(obj) = item.as_object() {
                    for key in obj.keys() {
                        if !fields.iter().any(|f| f == key) {
                            fields.push(key.clone());
                        }
                    }
                }
            }
            SchemaDescriptor::new(SchemaType::ListOfDicts, "warm").with_fields(fields)
        }
        _ => SchemaDescriptor::unknown("warm"),
    }
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| FabricError::backend_ctx("csv open", e))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| FabricError::backend_ctx("csv headers", e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records: Vec<Map<String, Value>> = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| FabricError::backend_ctx("csv row", e))?;
        let mut record = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            record.insert(header.clone(), parse_csv_cell(cell));
        }
        records.push(record);
    }
    Ok(DataFrame::from_records(&records))
}

fn parse_csv_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn warm() -> (tempfile::TempDir, WarmMemory) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(&dir.path().join("catalog")).await.unwrap());
        let warm = WarmMemory::open(
            &dir.path().join("warm"),
            AnalyticsSettings::default(),
            catalog,
        )
        .await
        .unwrap();
        (dir, warm)
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn store_dict_and_retrieve_by_tag() {
        let (_dir, warm) = warm().await;
        let outcome = warm
            .store(
                Payload::Map(map(json!({"name": "Test Item", "value": 42}))),
                Some(json!({"source": "test"})),
                Some(vec!["sample".into()]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.table_name, "warm_data");

        let tags = vec!["sample".to_string()];
        let records = warm.retrieve(Some(&tags), None, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data["name"], json!("Test Item"));
        assert_eq!(records[0].metadata["source"], json!("test"));
        assert_eq!(records[0].tags, vec!["sample"]);
    }

    #[tokio::test]
    async fn retrieval_is_newest_first() {
        let (_dir, warm) = warm().await;
        for i in 1..=3 {
            warm.store(
                Payload::Map(map(json!({"id": i}))),
                None,
                Some(vec!["T".into()]),
                None,
            )
            .await
            .unwrap();
        }
        let tags = vec!["T".to_string()];
        let records = warm.retrieve(Some(&tags), None, None).await.unwrap();
        let ids: Vec<i64> = records
            .iter()
            .map(|r| r.data["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn equality_filter_on_data_and_metadata() {
        let (_dir, warm) = warm().await;
        warm.store(
            Payload::Map(map(json!({"kind": "a"}))),
            Some(json!({"env": "prod"})),
            None,
            None,
        )
        .await
        .unwrap();
        warm.store(Payload::Map(map(json!({"kind": "b"}))), None, None, None)
            .await
            .unwrap();

        let filter = map(json!({"kind": "a"}));
        let hits = warm.retrieve(None, Some(&filter), None).await.unwrap();
        assert_eq!(hits.len(), 1);

        let filter = map(json!({"env": "prod"}));
        let hits = warm.retrieve(None, Some(&filter), None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn frame_with_table_tag_gets_own_table() {
        let (_dir, warm) = warm().await;
        let frame = DataFrame::from_dict(&map(json!({"a": [1, 2], "b": ["x", "y"]}))).unwrap();
        let outcome = warm
            .store(
                Payload::Frame(frame.clone()),
                None,
                Some(vec!["table:measurements".into(), "raw".into()]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.table_name, "measurements");

        let loaded = warm.retrieve_table("measurements", None).await.unwrap();
        assert_eq!(loaded.num_rows(), 2);
        assert_eq!(loaded.column("a").unwrap(), &[json!(1), json!(2)]);

        let schema = warm.get_schema(&outcome.data_id, None).await.unwrap().unwrap();
        assert_eq!(schema.type_tag, SchemaType::Table);
        assert_eq!(schema.fields, vec!["a", "b"]);
        assert_eq!(schema.dtypes["a"], "integer");
    }

    #[tokio::test]
    async fn reserved_table_names_rejected() {
        let (_dir, warm) = warm().await;
        let frame = DataFrame::from_dict(&map(json!({"a": [1]}))).unwrap();
        let err = warm
            .store(
                Payload::Frame(frame),
                None,
                Some(vec!["table:warm_data".into()]),
                None,
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn named_databases_are_isolated() {
        let (_dir, warm) = warm().await;
        warm.store(Payload::Map(map(json!({"x": 1}))), None, None, Some("left"))
            .await
            .unwrap();
        warm.store(Payload::Map(map(json!({"x": 2}))), None, None, Some("right"))
            .await
            .unwrap();

        assert_eq!(warm.retrieve(None, None, Some("left")).await.unwrap().len(), 1);
        let dbs = warm.list_databases().await.unwrap();
        assert!(dbs.contains(&"left".to_string()) && dbs.contains(&"right".to_string()));
    }

    #[tokio::test]
    async fn clear_drops_records_tags_and_catalog_entries() {
        let (_dir, warm) = warm().await;
        warm.store(
            Payload::Map(map(json!({"x": 1}))),
            None,
            Some(vec!["t".into()]),
            None,
        )
        .await
        .unwrap();
        warm.clear(Some(DEFAULT_DB)).await.unwrap();
        assert!(warm.retrieve(None, None, None).await.unwrap().is_empty());
        assert_eq!(warm.catalog.count(Tier::Warm).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn csv_import_creates_table_and_record() {
        let (dir, warm) = warm().await;
        let csv_path = dir.path().join("readings.csv");
        std::fs::write(&csv_path, "station,temp\ns1,21.5\ns2,19.0\n").unwrap();

        let outcome = warm
            .import_from_csv(&csv_path, None, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.table_name, "readings");

        let frame = warm.retrieve_table("readings", None).await.unwrap();
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.dtypes()["temp"], "float");

        let record = warm
            .retrieve_by_id(&outcome.data_id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.data["table_name"], json!("readings"));
    }

    #[tokio::test]
    async fn database_import_copies_tables() {
        let (dir, warm) = warm().await;

        // Build a source database with one table.
        let source_path = dir.path().join("source.db");
        let options = SqliteConnectOptions::new()
            .filename(&source_path)
            .create_if_missing(true);
        let source = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE readings (station TEXT, temp REAL)")
            .execute(&source)
            .await
            .unwrap();
        sqlx::query("INSERT INTO readings VALUES ('s1', 20.0), ('s2', 22.0)")
            .execute(&source)
            .await
            .unwrap();
        source.close().await;

        let outcome = warm
            .import_from_database(&source_path, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.imported_tables, vec!["readings"]);
        assert_eq!(outcome.data_ids.len(), 1);
        assert!(outcome.errors.is_empty());

        let frame = warm.retrieve_table("readings", None).await.unwrap();
        assert_eq!(frame.num_rows(), 2);
    }
}
