//! The store dispatcher.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use memstrata_catalog::{Catalog, Registration};
use memstrata_core::{FabricError, Payload, Result, Tier};
use memstrata_glacier::GlacierMemory;
use memstrata_tiers::{ColdMemory, HotMemory, RedHotMemory, WarmMemory};

/// Where a store landed.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub data_id: String,
    pub tier: Tier,
    pub location: String,
}

/// Routes writes by tier name, coercing payloads at the boundary:
///
/// | tier    | accepted payload        | normalisation                    |
/// |---------|-------------------------|----------------------------------|
/// | red-hot | array, list of floats   | dim-D f32, mismatch rejected     |
/// | hot     | any JSON-encodable      | JSON-encoded envelope at rest    |
/// | warm    | map, list, array, frame | payload row or named table       |
/// | cold    | map, frame              | map → frame via from_dict        |
/// | glacier | bytes, text, structured | JSON if structured, else raw     |
pub struct MemoryStore {
    catalog: Arc<Catalog>,
    red_hot: Arc<RedHotMemory>,
    hot: Arc<HotMemory>,
    warm: Arc<WarmMemory>,
    cold: Arc<ColdMemory>,
    glacier: Arc<GlacierMemory>,
}

impl MemoryStore {
    pub fn new(
        catalog: Arc<Catalog>,
        red_hot: Arc<RedHotMemory>,
        hot: Arc<HotMemory>,
        warm: Arc<WarmMemory>,
        cold: Arc<ColdMemory>,
        glacier: Arc<GlacierMemory>,
    ) -> Self {
        Self { catalog, red_hot, hot, warm, cold, glacier }
    }

    /// Store into the tier named by `to_tier`. Unknown names are rejected
    /// before any payload work happens.
    pub async fn store(
        &self,
        to_tier: &str,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let tier: Tier = to_tier.parse()?;
        self.store_in(tier, payload, metadata, tags).await
    }

    /// Typed variant of [`MemoryStore::store`].
    pub async fn store_in(
        &self,
        tier: Tier,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let outcome = match tier {
            Tier::RedHot => self.store_red_hot(payload, metadata, tags).await,
            Tier::Hot => self.store_hot(payload, metadata, tags).await,
            Tier::Warm => self.store_warm(payload, metadata, tags).await,
            Tier::Cold => self.store_cold(payload, metadata, tags).await,
            Tier::Glacier => self.store_glacier(payload, metadata, tags).await,
        };
        match &outcome {
            Ok(done) => debug!(tier = %done.tier, data_id = %done.data_id, "stored"),
            Err(err) => error!(tier = %tier, "store failed: {err}"),
        }
        outcome
    }

    async fn store_red_hot(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let vector = payload
            .as_vector()
            .ok_or_else(|| FabricError::NotVectorisable("store payload".into()))?;
        let data_id = Catalog::new_data_id();
        let metadata_map = metadata_as_map(metadata.as_ref());

        self.red_hot
            .store(&data_id, &vector, Some(metadata_map), tags.clone())
            .await?;

        let registration = Registration {
            tier: Tier::RedHot,
            location: data_id.clone(),
            size: (vector.len() * std::mem::size_of::<f32>()) as u64,
            data_type: "vector".into(),
            tags: tags.unwrap_or_default(),
            additional_meta: metadata.unwrap_or_else(|| json!({})),
        };
        if let Err(err) = self.catalog.register_with_id(&data_id, registration).await {
            let _ = self.red_hot.delete(&data_id).await;
            return Err(err);
        }
        Ok(StoreOutcome { location: data_id.clone(), data_id, tier: Tier::RedHot })
    }

    async fn store_hot(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let data_id = Catalog::new_data_id();
        let size = payload.approx_size_bytes();
        let data_type = payload.type_tag().to_string();
        let envelope = json!({
            "data": payload.to_json_value()?,
            "metadata": metadata.clone().unwrap_or(Value::Null),
            "tags": tags.clone().unwrap_or_default(),
            "stored_at": Utc::now().to_rfc3339(),
        });
        self.hot.create(&data_id, &envelope, None).await?;

        let registration = Registration {
            tier: Tier::Hot,
            location: data_id.clone(),
            size,
            data_type,
            tags: tags.unwrap_or_default(),
            additional_meta: metadata.unwrap_or_else(|| json!({})),
        };
        if let Err(err) = self.catalog.register_with_id(&data_id, registration).await {
            let _ = self.hot.delete(&data_id).await;
            return Err(err);
        }
        Ok(StoreOutcome { location: data_id.clone(), data_id, tier: Tier::Hot })
    }

    async fn store_warm(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        // Warm owns its record + tag + catalog transaction.
        let outcome = self.warm.store(payload, metadata, tags, None).await?;
        Ok(StoreOutcome {
            data_id: outcome.data_id,
            tier: Tier::Warm,
            location: outcome.location,
        })
    }

    async fn store_cold(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let data_id = self.cold.store(payload, metadata, tags).await?;
        Ok(StoreOutcome {
            location: format!("cold_data/{data_id}"),
            data_id,
            tier: Tier::Cold,
        })
    }

    async fn store_glacier(
        &self,
        payload: Payload,
        metadata: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<StoreOutcome> {
        let size = payload.approx_size_bytes();
        let data_type = payload.type_tag().to_string();
        let key = self
            .glacier
            .store(payload, Some(metadata_as_map(metadata.as_ref())), None)
            .await?;
        let connector = self.glacier.default_name().unwrap_or("glacier").to_string();

        let registration = Registration {
            tier: Tier::Glacier,
            location: format!("{connector}/{key}"),
            size,
            data_type,
            tags: tags.unwrap_or_default(),
            additional_meta: metadata.unwrap_or_else(|| json!({})),
        };
        let data_id = match self.catalog.register(registration).await {
            Ok(id) => id,
            Err(err) => {
                let _ = self.glacier.delete(&key, None).await;
                return Err(err);
            }
        };
        Ok(StoreOutcome {
            data_id,
            tier: Tier::Glacier,
            location: format!("{connector}/{key}"),
        })
    }
}

fn metadata_as_map(metadata: Option<&Value>) -> Map<String, Value> {
    match metadata {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("metadata".into(), other.clone());
            map
        }
        None => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstrata_core::{AnalyticsSettings, ColdConfig, GlacierConfig, RedHotConfig};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn store() -> (tempfile::TempDir, MemoryStore, Arc<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(&dir.path().join("catalog")).await.unwrap());
        let red_hot = Arc::new(
            RedHotMemory::open(
                &RedHotConfig { vector_dim: 8, ..RedHotConfig::default() },
                &dir.path().join("red_hot"),
            )
            .await
            .unwrap(),
        );
        let hot = Arc::new(HotMemory::in_memory());
        let warm = Arc::new(
            WarmMemory::open(
                &dir.path().join("warm"),
                AnalyticsSettings::default(),
                catalog.clone(),
            )
            .await
            .unwrap(),
        );
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("cold.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        let cold = Arc::new(
            ColdMemory::attach(pool, ColdConfig::default(), catalog.clone())
                .await
                .unwrap(),
        );
        let mut glacier_config = GlacierConfig::default();
        glacier_config.connectors.insert(
            "obj".into(),
            memstrata_core::ConnectorConfig { kind: "local".into(), ..Default::default() },
        );
        let glacier = Arc::new(
            GlacierMemory::from_config(&glacier_config, &dir.path().join("glacier")).unwrap(),
        );
        let store = MemoryStore::new(catalog.clone(), red_hot, hot, warm, cold, glacier);
        (dir, store, catalog)
    }

    #[tokio::test]
    async fn unknown_tier_is_rejected() {
        let (_dir, store, _catalog) = store().await;
        assert!(matches!(
            store
                .store("lukewarm", Payload::Text("x".into()), None, None)
                .await,
            Err(FabricError::TierUnknown(_))
        ));
    }

    #[tokio::test]
    async fn every_successful_store_has_a_catalog_entry() {
        let (_dir, store, catalog) = store().await;
        let cases: Vec<(&str, Payload)> = vec![
            ("red_hot", Payload::Array(vec![0.0; 8])),
            ("hot", Payload::Text("hello".into())),
            (
                "warm",
                Payload::Map(json!({"a": 1}).as_object().cloned().unwrap()),
            ),
            (
                "cold",
                Payload::Map(json!({"a": [1, 2]}).as_object().cloned().unwrap()),
            ),
            ("glacier", Payload::Bytes(vec![1, 2, 3])),
        ];
        for (tier_name, payload) in cases {
            let outcome = store
                .store(tier_name, payload, None, Some(vec!["e2e".into()]))
                .await
                .unwrap();
            let entry = catalog.get(&outcome.data_id).await.unwrap().unwrap();
            assert_eq!(entry.tier, outcome.tier);
            assert!(entry.size > 0, "size recorded for {tier_name}");
            assert!(entry.tags.contains(&"e2e".to_string()));
        }
    }

    #[tokio::test]
    async fn red_hot_rejects_non_vectors() {
        let (_dir, store, _catalog) = store().await;
        assert!(matches!(
            store
                .store("red_hot", Payload::Text("not a vector".into()), None, None)
                .await,
            Err(FabricError::NotVectorisable(_))
        ));
        assert!(matches!(
            store
                .store("red_hot", Payload::Array(vec![1.0; 3]), None, None)
                .await,
            Err(FabricError::DimensionMismatch { .. })
        ));
    }
}
