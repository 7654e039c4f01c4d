//! # Memstrata Catalog
//!
//! Authoritative registry of every artifact stored anywhere in the fabric.
//! Each artifact has exactly one catalog entry recording which tier holds it,
//! where inside that tier it lives, how big it is, and how often it has been
//! touched. Tiers own payload bytes; the catalog owns identity: other
//! components keep `data_id` handles, never direct references.
//!
//! Backed by an embedded SQLite database (`catalog.db` under the fabric base
//! path) with an artifact table and a one-to-many tag table. Registration is
//! atomic: the artifact row and its tag rows commit in one transaction, so a
//! half-registered artifact cannot be observed.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use memstrata_core::{FabricError, Result, Tier};

/// One registered artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Opaque unique id, generated at registration and never reused.
    pub data_id: String,
    pub tier: Tier,
    /// Tier-specific locator: vector key, hot key, `db/table`, file path,
    /// or `connector/key`.
    pub location: String,
    pub size: u64,
    /// Free-form type tag (`vector`, `dict`, `dataframe`, `parquet`, ...).
    pub data_type: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<String>,
    /// Opaque JSON blob carried alongside the entry.
    pub additional_meta: Value,
}

impl CatalogEntry {
    /// Whether the entry points at an externally-registered file.
    pub fn is_external(&self) -> bool {
        self.additional_meta
            .get("is_external")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Parameters for a single registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub tier: Tier,
    pub location: String,
    pub size: u64,
    pub data_type: String,
    pub tags: Vec<String>,
    pub additional_meta: Value,
}

/// Durable artifact registry over embedded SQLite.
#[derive(Debug)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (or create) the catalog database under `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog mkdir", e))?;
        let options = SqliteConnectOptions::new()
            .filename(dir.join("catalog.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog open", e))?;

        let catalog = Self { pool };
        catalog.initialize_schema().await?;
        info!("catalog ready at {:?}", dir.join("catalog.db"));
        Ok(catalog)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS artifacts (
                data_id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                location TEXT NOT NULL,
                size INTEGER NOT NULL,
                data_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                tags_csv TEXT NOT NULL DEFAULT '',
                additional_meta_json TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FabricError::backend_ctx("catalog schema", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS artifact_tags (
                data_id TEXT NOT NULL REFERENCES artifacts(data_id),
                tag TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FabricError::backend_ctx("catalog schema", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_tier ON artifacts(tier)")
            .execute(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog schema", e))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifact_tags_tag ON artifact_tags(tag)")
            .execute(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog schema", e))?;
        Ok(())
    }

    /// Generate a fresh artifact id. UUIDv4, so duplicate generation is
    /// impossible by construction.
    pub fn new_data_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Register an artifact, returning its generated id.
    pub async fn register(&self, registration: Registration) -> Result<String> {
        let data_id = Self::new_data_id();
        self.register_with_id(&data_id, registration).await?;
        Ok(data_id)
    }

    /// Register an artifact under a caller-chosen id. Tiers that must write
    /// payload bytes before the catalog entry pre-allocate the id with
    /// [`Catalog::new_data_id`] and call this afterwards.
    pub async fn register_with_id(&self, data_id: &str, registration: Registration) -> Result<()> {
        let now = Utc::now();
        let tags: Vec<String> = dedup_tags(&registration.tags);
        let tags_csv = tags.join(",");
        let meta_json = serde_json::to_string(&registration.additional_meta)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog register", e))?;

        sqlx::query(
            "INSERT INTO artifacts
                (data_id, tier, location, size, data_type, created_at, last_accessed,
                 access_count, tags_csv, additional_meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
        )
        .bind(data_id)
        .bind(registration.tier.as_str())
        .bind(&registration.location)
        .bind(registration.size as i64)
        .bind(&registration.data_type)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&tags_csv)
        .bind(&meta_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| FabricError::backend_ctx("catalog register", e))?;

        for tag in &tags {
            sqlx::query("INSERT INTO artifact_tags (data_id, tag) VALUES (?1, ?2)")
                .bind(data_id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(|e| FabricError::backend_ctx("catalog register", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog register", e))?;

        debug!(data_id, tier = %registration.tier, "registered artifact");
        Ok(())
    }

    /// Fetch one entry.
    pub async fn get(&self, data_id: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE data_id = ?1")
            .bind(data_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog get", e))?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// All entries in a tier, oldest first.
    pub async fn list(&self, tier: Tier) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query("SELECT * FROM artifacts WHERE tier = ?1 ORDER BY created_at ASC")
            .bind(tier.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog list", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Look an entry up by its tier-specific location.
    pub async fn find_by_location(&self, tier: Tier, location: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE tier = ?1 AND location = ?2")
            .bind(tier.as_str())
            .bind(location)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog find", e))?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// Record an access: bump the monotonic counter and refresh
    /// `last_accessed`.
    pub async fn touch(&self, data_id: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE artifacts
             SET access_count = access_count + 1, last_accessed = ?1
             WHERE data_id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(data_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FabricError::backend_ctx("catalog touch", e))?;
        if updated.rows_affected() == 0 {
            return Err(FabricError::NotFound(data_id.to_string()));
        }
        Ok(())
    }

    /// Remove an entry and its tag rows. Returns whether it existed.
    pub async fn remove(&self, data_id: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog remove", e))?;
        sqlx::query("DELETE FROM artifact_tags WHERE data_id = ?1")
            .bind(data_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog remove", e))?;
        let deleted = sqlx::query("DELETE FROM artifacts WHERE data_id = ?1")
            .bind(data_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog remove", e))?;
        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog remove", e))?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Drop every entry in a tier. Returns the number removed.
    pub async fn clear_tier(&self, tier: Tier) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog clear", e))?;
        sqlx::query(
            "DELETE FROM artifact_tags WHERE data_id IN
                (SELECT data_id FROM artifacts WHERE tier = ?1)",
        )
        .bind(tier.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| FabricError::backend_ctx("catalog clear", e))?;
        let deleted = sqlx::query("DELETE FROM artifacts WHERE tier = ?1")
            .bind(tier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog clear", e))?;
        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog clear", e))?;
        Ok(deleted.rows_affected())
    }

    /// Register many artifacts in one transaction. Used by batch import so a
    /// crash mid-import cannot leave a partial registration set.
    pub async fn register_batch(&self, registrations: Vec<Registration>) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut ids = Vec::with_capacity(registrations.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog batch", e))?;

        for registration in registrations {
            let data_id = Self::new_data_id();
            let tags = dedup_tags(&registration.tags);
            let meta_json = serde_json::to_string(&registration.additional_meta)?;
            sqlx::query(
                "INSERT INTO artifacts
                    (data_id, tier, location, size, data_type, created_at, last_accessed,
                     access_count, tags_csv, additional_meta_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
            )
            .bind(&data_id)
            .bind(registration.tier.as_str())
            .bind(&registration.location)
            .bind(registration.size as i64)
            .bind(&registration.data_type)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(tags.join(","))
            .bind(&meta_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog batch", e))?;

            for tag in &tags {
                sqlx::query("INSERT INTO artifact_tags (data_id, tag) VALUES (?1, ?2)")
                    .bind(&data_id)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| FabricError::backend_ctx("catalog batch", e))?;
            }
            ids.push(data_id);
        }

        tx.commit()
            .await
            .map_err(|e| FabricError::backend_ctx("catalog batch", e))?;
        Ok(ids)
    }

    /// Number of entries in a tier.
    pub async fn count(&self, tier: Tier) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE tier = ?1")
            .bind(tier.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FabricError::backend_ctx("catalog count", e))?;
        Ok(count as u64)
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn dedup_tags(tags: &[String]) -> Vec<String> {
    let set: BTreeSet<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().map(str::to_string).collect()
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CatalogEntry> {
    let tier: String = row.get("tier");
    let created_at: String = row.get("created_at");
    let last_accessed: String = row.get("last_accessed");
    let tags_csv: String = row.get("tags_csv");
    let meta_json: String = row.get("additional_meta_json");

    Ok(CatalogEntry {
        data_id: row.get("data_id"),
        tier: tier.parse()?,
        location: row.get("location"),
        size: row.get::<i64, _>("size") as u64,
        data_type: row.get("data_type"),
        created_at: parse_timestamp(&created_at)?,
        last_accessed: parse_timestamp(&last_accessed)?,
        access_count: row.get::<i64, _>("access_count") as u64,
        tags: if tags_csv.is_empty() {
            Vec::new()
        } else {
            tags_csv.split(',').map(str::to_string).collect()
        },
        additional_meta: serde_json::from_str(&meta_json)?,
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FabricError::backend_ctx("catalog timestamp", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        (dir, catalog)
    }

    fn registration(tier: Tier, location: &str) -> Registration {
        Registration {
            tier,
            location: location.to_string(),
            size: 128,
            data_type: "dict".to_string(),
            tags: vec!["alpha".into(), "beta".into(), "alpha".into()],
            additional_meta: json!({"origin": "test"}),
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let (_dir, catalog) = catalog().await;
        let id = catalog
            .register(registration(Tier::Warm, "default/abc"))
            .await
            .unwrap();
        let entry = catalog.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Warm);
        assert_eq!(entry.location, "default/abc");
        assert_eq!(entry.size, 128);
        assert_eq!(entry.tags, vec!["alpha", "beta"]);
        assert_eq!(entry.access_count, 0);
    }

    #[tokio::test]
    async fn touch_is_monotonic() {
        let (_dir, catalog) = catalog().await;
        let id = catalog
            .register(registration(Tier::Hot, "counter"))
            .await
            .unwrap();
        catalog.touch(&id).await.unwrap();
        catalog.touch(&id).await.unwrap();
        let entry = catalog.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= entry.created_at);
    }

    #[tokio::test]
    async fn touch_missing_is_not_found() {
        let (_dir, catalog) = catalog().await;
        assert!(matches!(
            catalog.touch("ghost").await,
            Err(FabricError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_drops_tags_too() {
        let (_dir, catalog) = catalog().await;
        let id = catalog
            .register(registration(Tier::Cold, "/tmp/f.parquet"))
            .await
            .unwrap();
        assert!(catalog.remove(&id).await.unwrap());
        assert!(catalog.get(&id).await.unwrap().is_none());
        assert!(!catalog.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_tier_scoped() {
        let (_dir, catalog) = catalog().await;
        catalog
            .register(registration(Tier::Cold, "a"))
            .await
            .unwrap();
        catalog
            .register(registration(Tier::Warm, "b"))
            .await
            .unwrap();
        let cold = catalog.list(Tier::Cold).await.unwrap();
        assert_eq!(cold.len(), 1);
        assert_eq!(catalog.count(Tier::Warm).await.unwrap(), 1);
        assert_eq!(catalog.count(Tier::Glacier).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_registration_is_atomic() {
        let (_dir, catalog) = catalog().await;
        let ids = catalog
            .register_batch(vec![
                registration(Tier::Cold, "f1"),
                registration(Tier::Cold, "f2"),
            ])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(catalog.count(Tier::Cold).await.unwrap(), 2);
    }
}
