//! Prioritised tier-ordered search.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use memstrata_catalog::{Catalog, CatalogEntry};
use memstrata_core::{Result, Tier};
use memstrata_index::{SchemaHit, SchemaIndex};

use crate::capabilities::{infer_query_capabilities, QueryCapabilities};

/// Result of a prioritised search: the single tier that satisfied the
/// threshold and its accepted hits, sorted by ascending distance.
#[derive(Debug)]
pub struct TierSearchOutcome {
    pub tier: Tier,
    pub hits: Vec<SchemaHit>,
}

/// One hit enriched with location split, schema columns, refreshed catalog
/// info and advisory query capabilities.
#[derive(Debug)]
pub struct EnhancedHit {
    pub hit: SchemaHit,
    pub database_name: Option<String>,
    pub table_name: Option<String>,
    pub columns: Vec<String>,
    pub data_structure_type: String,
    pub catalog_info: Option<CatalogEntry>,
    pub query_capabilities: Option<QueryCapabilities>,
}

/// Walks tiers warmest-first, refreshing and searching one tier at a time,
/// and stops at the first tier whose hits clear the similarity threshold.
pub struct PrioritizedSearch {
    index: Arc<SchemaIndex>,
    catalog: Arc<Catalog>,
    similarity_threshold: f32,
    distance_threshold: f32,
}

impl PrioritizedSearch {
    /// `similarity_threshold` is clamped to `[0, 1]`; a hit is accepted when
    /// its cosine distance is at most `1 - similarity_threshold`.
    pub fn new(index: Arc<SchemaIndex>, catalog: Arc<Catalog>, similarity_threshold: f32) -> Self {
        let similarity_threshold = similarity_threshold.clamp(0.0, 1.0);
        Self {
            index,
            catalog,
            similarity_threshold,
            distance_threshold: 1.0 - similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Search tiers in priority order (warmest first by default). Colder
    /// tiers are skipped as soon as one tier yields accepted hits.
    pub async fn search(
        &self,
        query: &str,
        tiers: Option<&[Tier]>,
        k: usize,
    ) -> Result<Option<TierSearchOutcome>> {
        let walk: Vec<Tier> = tiers.map(|t| t.to_vec()).unwrap_or_else(|| Tier::ALL.to_vec());

        for tier in walk {
            self.index.update_index(tier).await?;
            let hits = self.index.search(query, Some(&[tier]), k).await?;
            let accepted: Vec<SchemaHit> = hits
                .into_iter()
                .filter(|hit| hit.distance <= self.distance_threshold)
                .collect();

            if !accepted.is_empty() {
                info!(
                    tier = %tier,
                    hits = accepted.len(),
                    threshold = %self.similarity_threshold,
                    "prioritised search matched"
                );
                return Ok(Some(TierSearchOutcome { tier, hits: accepted }));
            }
            debug!(tier = %tier, "no hits met the threshold, trying next tier");
        }
        Ok(None)
    }

    /// Enrich accepted hits with split locations, schema columns, catalog
    /// info (best effort) and query capabilities.
    pub async fn get_enhanced_metadata(&self, hits: &[SchemaHit]) -> Vec<EnhancedHit> {
        let mut enhanced = Vec::with_capacity(hits.len());
        for hit in hits {
            let (database_name, table_name) = match hit.entry.location.split_once('/') {
                Some((db, table)) => (Some(db.to_string()), Some(table.to_string())),
                None => (None, None),
            };
            let columns = hit.schema.fields.clone();
            let catalog_info = self.catalog.get(&hit.entry.data_id).await.ok().flatten();
            let query_capabilities = if columns.is_empty() {
                None
            } else {
                Some(infer_query_capabilities(&columns))
            };
            enhanced.push(EnhancedHit {
                hit: SchemaHit {
                    tier: hit.tier,
                    distance: hit.distance,
                    rank: hit.rank,
                    entry: hit.entry.clone(),
                    schema: hit.schema.clone(),
                },
                database_name,
                table_name,
                data_structure_type: hit.schema.type_tag.as_str().to_string(),
                columns,
                catalog_info,
                query_capabilities,
            });
        }
        enhanced
    }

    /// JSON rendering of enhanced hits for agent consumers.
    pub async fn enhanced_json(&self, hits: &[SchemaHit]) -> Vec<Value> {
        self.get_enhanced_metadata(hits)
            .await
            .into_iter()
            .map(|e| {
                serde_json::json!({
                    "tier": e.hit.tier.as_str(),
                    "distance": e.hit.distance,
                    "rank": e.hit.rank,
                    "data_id": e.hit.entry.data_id,
                    "location": e.hit.entry.location,
                    "database_name": e.database_name,
                    "table_name": e.table_name,
                    "columns": e.columns,
                    "data_structure_type": e.data_structure_type,
                    "query_capabilities": e.query_capabilities,
                })
            })
            .collect()
    }
}
