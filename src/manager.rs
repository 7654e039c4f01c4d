//! The memory manager: single owner of shared fabric resources.
//!
//! The manager loads the configuration once, creates the per-tier directory
//! layout, and initialises every shared resource exactly once: the catalog,
//! the analytical connection, the red-hot vector index, the hot backend, and
//! the glacier connector registry (built eagerly; remote endpoints are
//! dialled lazily). Tier components borrow these handles and must not close
//! them; `cleanup()` tears everything down in reverse construction order.
//!
//! One instance per process is the norm: `initialise()` is a guarded
//! one-shot, so the first caller constructs and every later caller observes
//! the same instance. Tests and embedders that want isolation construct
//! managers directly with `new()`.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use memstrata_catalog::Catalog;
use memstrata_core::{FabricConfig, FabricError, Result, Tier};
use memstrata_glacier::{DataSource, DataSourceKind, DataSourceRegistry, GlacierMemory};
use memstrata_index::{Encoder, HashingEncoder, SchemaIndex};
use memstrata_query::{MemoryRetrieval, MemoryStore, MemoryTiering, PrioritizedSearch};
use memstrata_tiers::{ColdMemory, HotMemory, RedHotMemory, WarmMemory};

static GLOBAL: OnceCell<Arc<MemoryManager>> = OnceCell::const_new();

/// Owner of all shared fabric state.
pub struct MemoryManager {
    config: FabricConfig,
    catalog: Arc<Catalog>,
    analytics: SqlitePool,
    red_hot: Arc<RedHotMemory>,
    hot: Arc<HotMemory>,
    warm: Arc<WarmMemory>,
    cold: Arc<ColdMemory>,
    glacier: Arc<GlacierMemory>,
    sources: Arc<DataSourceRegistry>,
    schema_index: Arc<SchemaIndex>,
}

impl MemoryManager {
    /// Construct a fresh manager. Validates the configuration, creates the
    /// directory layout, and brings up every tier.
    pub async fn new(config: FabricConfig) -> Result<Arc<Self>> {
        Self::with_encoder(config, Arc::new(HashingEncoder::default())).await
    }

    /// Construct with a caller-supplied schema encoder.
    pub async fn with_encoder(
        config: FabricConfig,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!(base = %config.memory.base_path.display(), "initialising memory manager");

        // Directory layout first: base path, one directory per tier, and the
        // shared data directories.
        tokio::fs::create_dir_all(&config.memory.base_path)
            .await
            .map_err(|e| FabricError::backend_ctx("mkdir", e))?;
        for tier in Tier::ALL {
            tokio::fs::create_dir_all(config.tier_path(tier))
                .await
                .map_err(|e| FabricError::backend_ctx("mkdir", e))?;
        }
        for dir in [&config.data.storage, &config.data.cache, &config.data.models] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FabricError::backend_ctx("mkdir", e))?;
        }

        let catalog = Arc::new(Catalog::open(&config.memory.base_path).await?);

        // Shared analytical connection, configured from the cold tier's
        // engine settings. Cold borrows it; warm keeps per-database pools.
        let cold_dir = config.tier_path(Tier::Cold);
        let analytics_options = SqliteConnectOptions::new()
            .filename(cold_dir.join("analytics.db"))
            .create_if_missing(true);
        let analytics = SqlitePoolOptions::new()
            .max_connections(config.memory.cold.duckdb.threads.max(1))
            .connect_with(analytics_options)
            .await
            .map_err(|e| FabricError::backend_ctx("analytics open", e))?;
        let cache_kib = (config.memory.cold.duckdb.memory_limit_bytes() / 1024).max(2048);
        sqlx::query(&format!("PRAGMA cache_size = -{cache_kib}"))
            .execute(&analytics)
            .await
            .map_err(|e| FabricError::backend_ctx("analytics pragma", e))?;

        let red_hot = Arc::new(
            RedHotMemory::open(&config.memory.red_hot, &config.tier_path(Tier::RedHot)).await?,
        );
        let hot = Arc::new(HotMemory::connect(&config.memory.hot).await);
        let warm = Arc::new(
            WarmMemory::open(
                &config.tier_path(Tier::Warm),
                config.memory.warm.duckdb.clone(),
                catalog.clone(),
            )
            .await?,
        );
        let cold = Arc::new(
            ColdMemory::attach(
                analytics.clone(),
                config.memory.cold.clone(),
                catalog.clone(),
            )
            .await?,
        );
        let glacier = Arc::new(GlacierMemory::from_config(
            &config.memory.glacier,
            &config.tier_path(Tier::Glacier),
        )?);
        let sources = Arc::new(DataSourceRegistry::new());

        let schema_index = Arc::new(SchemaIndex::new(
            encoder,
            catalog.clone(),
            red_hot.clone(),
            hot.clone(),
            warm.clone(),
            cold.clone(),
            sources.clone(),
            config.data.storage.clone(),
        ));

        info!("memory manager ready");
        Ok(Arc::new(Self {
            config,
            catalog,
            analytics,
            red_hot,
            hot,
            warm,
            cold,
            glacier,
            sources,
            schema_index,
        }))
    }

    /// One-shot process-wide initialisation: the first caller constructs,
    /// later callers observe the same instance regardless of the config they
    /// pass.
    pub async fn initialise(config: FabricConfig) -> Result<Arc<Self>> {
        GLOBAL
            .get_or_try_init(|| async { Self::new(config).await })
            .await
            .map(Arc::clone)
    }

    /// The process-wide instance, if `initialise` has run.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    pub fn red_hot(&self) -> Arc<RedHotMemory> {
        self.red_hot.clone()
    }

    pub fn hot(&self) -> Arc<HotMemory> {
        self.hot.clone()
    }

    pub fn warm(&self) -> Arc<WarmMemory> {
        self.warm.clone()
    }

    pub fn cold(&self) -> Arc<ColdMemory> {
        self.cold.clone()
    }

    pub fn glacier(&self) -> Arc<GlacierMemory> {
        self.glacier.clone()
    }

    pub fn schema_index(&self) -> Arc<SchemaIndex> {
        self.schema_index.clone()
    }

    /// The store dispatcher bound to this manager's tiers.
    pub fn memory_store(&self) -> MemoryStore {
        MemoryStore::new(
            self.catalog.clone(),
            self.red_hot.clone(),
            self.hot.clone(),
            self.warm.clone(),
            self.cold.clone(),
            self.glacier.clone(),
        )
    }

    /// The retrieval dispatcher bound to this manager's tiers.
    pub fn memory_retrieval(&self) -> MemoryRetrieval {
        MemoryRetrieval::new(
            self.catalog.clone(),
            self.red_hot.clone(),
            self.hot.clone(),
            self.warm.clone(),
            self.cold.clone(),
            self.glacier.clone(),
            self.sources.clone(),
            self.config.data.storage.clone(),
        )
    }

    /// The tiering engine bound to this manager's tiers.
    pub fn tiering(&self) -> MemoryTiering {
        MemoryTiering::new(
            self.catalog.clone(),
            self.red_hot.clone(),
            self.hot.clone(),
            self.warm.clone(),
            self.cold.clone(),
            self.glacier.clone(),
        )
    }

    /// A prioritised search over this manager's schema index.
    pub fn prioritized_search(&self, similarity_threshold: f32) -> PrioritizedSearch {
        PrioritizedSearch::new(self.schema_index.clone(), self.catalog.clone(), similarity_threshold)
    }

    /// Hand out a configured data-source connector. Connector kinds are a
    /// closed set; unknown names are errors.
    pub async fn get_connector(&self, kind: &str) -> Result<Arc<dyn DataSource>> {
        let kind: DataSourceKind = kind.parse()?;
        let data_dir = self.get_data_source_path(kind.as_str()).await?;
        self.sources.get(kind, &data_dir).await
    }

    /// Absolute data directory for a source kind, created if missing.
    pub async fn get_data_source_path(&self, kind: &str) -> Result<PathBuf> {
        let path = self.config.data.storage.join(kind);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| FabricError::backend_ctx("mkdir", e))?;
        Ok(path)
    }

    /// Absolute cache directory for a source kind, created if missing.
    pub async fn get_cache_path(&self, kind: &str) -> Result<PathBuf> {
        let path = self.config.data.cache.join(kind);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| FabricError::backend_ctx("mkdir", e))?;
        Ok(path)
    }

    /// Close owned resources in reverse construction order.
    pub async fn cleanup(&self) -> Result<()> {
        debug!("memory manager cleanup");
        self.schema_index.cleanup().await;
        self.sources.cleanup().await?;
        self.glacier.cleanup().await?;
        self.red_hot.flush().await?;
        self.warm.close().await;
        self.analytics.close().await;
        self.catalog.close().await;
        info!("memory manager closed");
        Ok(())
    }
}
