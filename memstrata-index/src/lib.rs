//! # Memstrata Schema Index
//!
//! Cross-tier semantic search over schema descriptors. For every catalog
//! entry of a tier, the index asks that tier for the artifact's schema,
//! vectorises its text form through an [`Encoder`], and keeps one exact-L2
//! index per tier alongside positional metadata pointing back at the catalog.
//! Natural-language queries then discover where relevant data lives, and
//! what queries it supports, without touching payloads.
//!
//! Embeddings are unit-norm, so half the squared L2 distance between two of
//! them equals their cosine distance; search results report the latter.

mod encoder;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use memstrata_catalog::{Catalog, CatalogEntry};
use memstrata_core::{FlatIndex, Result, SchemaDescriptor, Tier};
use memstrata_glacier::{DataSourceKind, DataSourceRegistry, SpatialInputKind};
use memstrata_tiers::{ColdMemory, HotMemory, RedHotMemory, WarmMemory};

pub use encoder::{Encoder, HashingEncoder};

/// One schema-search hit: catalog fields plus the schema that matched.
#[derive(Debug, Clone)]
pub struct SchemaHit {
    pub tier: Tier,
    /// Cosine distance to the query; lower is closer.
    pub distance: f32,
    /// 1-based position within the hit's tier.
    pub rank: usize,
    pub entry: CatalogEntry,
    pub schema: SchemaDescriptor,
}

struct TierIndex {
    index: FlatIndex,
    entries: Vec<(CatalogEntry, SchemaDescriptor)>,
}

/// Per-tier vector index over schema descriptors.
pub struct SchemaIndex {
    encoder: Arc<dyn Encoder>,
    catalog: Arc<Catalog>,
    red_hot: Arc<RedHotMemory>,
    hot: Arc<HotMemory>,
    warm: Arc<WarmMemory>,
    cold: Arc<ColdMemory>,
    sources: Arc<DataSourceRegistry>,
    sources_dir: PathBuf,
    state: RwLock<HashMap<Tier, TierIndex>>,
}

impl SchemaIndex {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder: Arc<dyn Encoder>,
        catalog: Arc<Catalog>,
        red_hot: Arc<RedHotMemory>,
        hot: Arc<HotMemory>,
        warm: Arc<WarmMemory>,
        cold: Arc<ColdMemory>,
        sources: Arc<DataSourceRegistry>,
        sources_dir: PathBuf,
    ) -> Self {
        Self {
            encoder,
            catalog,
            red_hot,
            hot,
            warm,
            cold,
            sources,
            sources_dir,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild one tier's index from the catalog. Entries whose tier cannot
    /// produce a schema are indexed under a sentinel descriptor so they stay
    /// discoverable.
    pub async fn update_index(&self, tier: Tier) -> Result<()> {
        let catalog_entries = self.catalog.list(tier).await?;
        let mut index = FlatIndex::new(self.encoder.dimension());
        let mut entries = Vec::with_capacity(catalog_entries.len());

        for entry in catalog_entries {
            let schema = match self.schema_for(tier, &entry).await {
                Ok(Some(schema)) => schema,
                Ok(None) => SchemaDescriptor::unknown(tier.as_str()),
                Err(err) => {
                    warn!(data_id = %entry.data_id, tier = %tier, "schema fetch failed: {err}");
                    SchemaDescriptor::unknown(tier.as_str())
                }
            };
            let embedding = self.encoder.encode(&schema.embedding_text());
            index.add(&embedding)?;
            entries.push((entry, schema));
        }

        info!(tier = %tier, entries = entries.len(), "schema index updated");
        self.state.write().await.insert(tier, TierIndex { index, entries });
        Ok(())
    }

    /// Rebuild every tier's index.
    pub async fn update_all_indexes(&self) -> Result<()> {
        for tier in Tier::ALL {
            self.update_index(tier).await?;
        }
        Ok(())
    }

    /// Number of indexed entries for a tier.
    pub async fn indexed_count(&self, tier: Tier) -> usize {
        self.state
            .read()
            .await
            .get(&tier)
            .map(|t| t.entries.len())
            .unwrap_or(0)
    }

    /// Search the requested tiers (all by default), returning hits sorted by
    /// ascending cosine distance.
    pub async fn search(
        &self,
        query: &str,
        tiers: Option<&[Tier]>,
        k: usize,
    ) -> Result<Vec<SchemaHit>> {
        let query_vector = self.encoder.encode(query);
        let search_tiers: Vec<Tier> = tiers.map(|t| t.to_vec()).unwrap_or_else(|| Tier::ALL.to_vec());

        let state = self.state.read().await;
        let mut hits = Vec::new();
        for tier in search_tiers {
            let Some(tier_index) = state.get(&tier) else {
                continue;
            };
            if tier_index.index.is_empty() {
                continue;
            }
            let raw = tier_index.index.search(&query_vector, k, |_| true)?;
            for (rank, (slot, squared)) in raw.into_iter().enumerate() {
                let (entry, schema) = &tier_index.entries[slot];
                hits.push(SchemaHit {
                    tier,
                    // Unit-norm embeddings: d_cos = ||a-b||^2 / 2.
                    distance: squared / 2.0,
                    rank: rank + 1,
                    entry: entry.clone(),
                    schema: schema.clone(),
                });
            }
        }
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(query, hits = hits.len(), "schema search");
        Ok(hits)
    }

    /// Release per-tier resources.
    pub async fn cleanup(&self) {
        self.state.write().await.clear();
    }

    async fn schema_for(&self, tier: Tier, entry: &CatalogEntry) -> Result<Option<SchemaDescriptor>> {
        match tier {
            Tier::RedHot => self.red_hot.get_schema(&entry.location).await,
            Tier::Hot => self.hot.get_schema(&entry.location).await,
            Tier::Warm => {
                let db_name = entry.location.split('/').next();
                self.warm.get_schema(&entry.data_id, db_name).await
            }
            Tier::Cold => self.cold.get_schema(&entry.data_id).await,
            Tier::Glacier => self.glacier_schema(entry).await,
        }
    }

    /// Glacier artifacts carry their source coordinates in the catalog
    /// metadata; the schema comes from the data source itself.
    async fn glacier_schema(&self, entry: &CatalogEntry) -> Result<Option<SchemaDescriptor>> {
        let meta = &entry.additional_meta;
        let (Some(kind), Some(source)) = (
            meta.get("source_kind").and_then(Value::as_str),
            meta.get("source").and_then(Value::as_str),
        ) else {
            return Ok(None);
        };
        let kind: DataSourceKind = kind.parse()?;
        let spatial_input = meta.get("spatial_input").cloned().unwrap_or(Value::Null);
        let spatial_kind: SpatialInputKind = meta
            .get("spatial_input_type")
            .and_then(Value::as_str)
            .unwrap_or("bbox")
            .parse()?;

        let connector = self
            .sources
            .get(kind, &self.sources_dir.join(kind.as_str()))
            .await?;
        connector
            .get_schema(source, &spatial_input, spatial_kind)
            .await
            .map(Some)
    }
}
