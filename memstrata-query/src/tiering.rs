//! Adjacent-tier promotion and demotion.
//!
//! The fabric never moves an artifact more than one step at a time; callers
//! chain single-step promotions when they need to traverse the whole ladder.
//! Every step preserves format where possible and falls back to an explicit
//! wrapped form where not:
//!
//! - glacier → cold: frames store directly; maps and lists go through frame
//!   construction with a single-column JSON fallback; raw bytes that parse
//!   as JSON take the structured path, anything else is base64-wrapped into
//!   a one-row frame marked `encoding = "base64"`.
//! - cold → warm: the frame becomes a named warm table.
//! - warm → hot: the record lands under a hot key.
//! - hot → red-hot: only vector-shaped values move; anything else is
//!   rejected.
//!
//! Demotions are the symmetric inverses.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use memstrata_catalog::{Catalog, Registration};
use memstrata_core::{DataFrame, FabricError, Payload, Result, Tier};
use memstrata_glacier::{GlacierMemory, GlacierValue};
use memstrata_tiers::{ColdMemory, HotMemory, RedHotMemory, WarmMemory};

/// Moves artifacts between adjacent tiers.
pub struct MemoryTiering {
    catalog: Arc<Catalog>,
    red_hot: Arc<RedHotMemory>,
    hot: Arc<HotMemory>,
    warm: Arc<WarmMemory>,
    cold: Arc<ColdMemory>,
    glacier: Arc<GlacierMemory>,
}

impl MemoryTiering {
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

    /// Generic single-step promotion. Rejects same-tier, colder, and
    /// non-adjacent targets.
    pub async fn promote_to_tier(
        &self,
        data_key: &str,
        source_tier: Tier,
        target_tier: Tier,
        new_key: Option<&str>,
    ) -> Result<String> {
        if !source_tier.is_adjacent_promotion(target_tier) {
            return Err(FabricError::InvalidPromotion {
                from: source_tier,
                target: target_tier,
            });
        }
        match source_tier {
            Tier::Glacier => self.glacier_to_cold(data_key, None).await,
            Tier::Cold => {
                let table = new_key.unwrap_or(data_key);
                self.cold_to_warm(data_key, table).await
            }
            Tier::Warm => self.warm_to_hot(data_key, new_key).await,
            Tier::Hot => {
                self.hot_to_red_hot(data_key, new_key).await?;
                Ok(new_key.unwrap_or(data_key).to_string())
            }
            Tier::RedHot => unreachable!("no tier is warmer than red_hot"),
        }
    }

    /// Generic single-step demotion, the symmetric inverse.
    pub async fn demote_to_tier(
        &self,
        data_key: &str,
        source_tier: Tier,
        target_tier: Tier,
        new_key: Option<&str>,
    ) -> Result<String> {
        if !source_tier.is_adjacent_demotion(target_tier) {
            return Err(FabricError::InvalidPromotion {
                from: source_tier,
                target: target_tier,
            });
        }
        match source_tier {
            Tier::RedHot => self.red_hot_to_hot(data_key, new_key).await,
            Tier::Hot => {
                let outcome = self.hot_to_warm(data_key).await?;
                Ok(outcome)
            }
            Tier::Warm => self.warm_to_cold(data_key).await,
            Tier::Cold => self.cold_to_glacier(data_key, None).await,
            Tier::Glacier => unreachable!("no tier is colder than glacier"),
        }
    }

    /// Glacier → cold with type-preserving conversion. Returns the new cold
    /// data id; the catalog entry records where the artifact came from.
    pub async fn glacier_to_cold(&self, key: &str, connector: Option<&str>) -> Result<String> {
        let value = self
            .glacier
            .retrieve(key, connector)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("glacier key {key}")))?;

        let frame = frame_from_glacier_value(value);
        let metadata = json!({
            "original_source": "glacier",
            "original_key": key,
            "original_connector": connector
                .map(str::to_string)
                .or_else(|| self.glacier.default_name().map(str::to_string)),
            "transfer_date": Utc::now().to_rfc3339(),
        });

        let data_id = self
            .cold
            .store(Payload::Frame(frame), Some(metadata), None)
            .await?;
        info!(key, data_id, "promoted glacier object to cold");
        Ok(data_id)
    }

    /// Cold → warm: the frame becomes a named warm table.
    pub async fn cold_to_warm(&self, data_id: &str, table_name: &str) -> Result<String> {
        let record = self
            .cold
            .retrieve(data_id)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("cold id {data_id}")))?;
        let outcome = self
            .warm
            .store(
                Payload::Frame(record.data),
                Some(json!({ "promoted_from": "cold", "cold_data_id": data_id })),
                Some(vec![format!("table:{table_name}")]),
                None,
            )
            .await?;
        info!(data_id, table = %outcome.table_name, "promoted cold frame to warm");
        Ok(outcome.data_id)
    }

    /// Warm → hot: the record lands under a hot key (the warm data id by
    /// default).
    pub async fn warm_to_hot(&self, data_id: &str, hot_key: Option<&str>) -> Result<String> {
        let record = self
            .warm
            .retrieve_by_id(data_id, None)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("warm id {data_id}")))?;
        let key = hot_key.unwrap_or(data_id).to_string();

        let envelope = json!({
            "data": record.data,
            "metadata": record.metadata,
            "tags": record.tags,
            "stored_at": Utc::now().to_rfc3339(),
        });
        self.hot.create(&key, &envelope, None).await?;
        self.register_promotion(Tier::Hot, &key, &record.tags, json!({
            "promoted_from": "warm",
            "warm_data_id": data_id,
        }))
        .await?;
        info!(data_id, key, "promoted warm record to hot");
        Ok(key)
    }

    /// Hot → red-hot: only vector-shaped values move.
    pub async fn hot_to_red_hot(&self, hot_key: &str, red_hot_key: Option<&str>) -> Result<()> {
        let value = self
            .hot
            .read(hot_key)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("hot key {hot_key}")))?;
        let subject = value.get("data").unwrap_or(&value);
        let vector = as_vector(subject)
            .ok_or_else(|| FabricError::NotVectorisable(hot_key.to_string()))?;

        let key = red_hot_key.unwrap_or(hot_key);
        self.red_hot.store(key, &vector, None, None).await?;
        self.register_promotion(Tier::RedHot, key, &[], json!({
            "promoted_from": "hot",
            "hot_key": hot_key,
        }))
        .await?;
        info!(hot_key, key, "promoted hot value to red_hot");
        Ok(())
    }

    /// Red-hot → hot demotion: the raw vector moves into a hot envelope.
    pub async fn red_hot_to_hot(&self, key: &str, hot_key: Option<&str>) -> Result<String> {
        let vector = self
            .red_hot
            .vector(key)
            .await
            .ok_or_else(|| FabricError::NotFound(format!("red_hot key {key}")))?;
        let record = self.red_hot.record(key).await;
        let target = hot_key.unwrap_or(key).to_string();
        let envelope = json!({
            "data": vector,
            "metadata": record.as_ref().map(|r| Value::Object(r.metadata.clone())).unwrap_or(Value::Null),
            "tags": record.as_ref().map(|r| r.tags.clone()).unwrap_or_default(),
            "stored_at": Utc::now().to_rfc3339(),
        });
        self.hot.create(&target, &envelope, None).await?;
        self.register_promotion(Tier::Hot, &target, &[], json!({
            "demoted_from": "red_hot",
            "red_hot_key": key,
        }))
        .await?;
        debug!(key, target, "demoted red_hot vector to hot");
        Ok(target)
    }

    /// Hot → warm demotion.
    pub async fn hot_to_warm(&self, hot_key: &str) -> Result<String> {
        let value = self
            .hot
            .read(hot_key)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("hot key {hot_key}")))?;
        let subject = value.get("data").cloned().unwrap_or(value);
        let outcome = self
            .warm
            .store(
                Payload::from_json_value(subject),
                Some(json!({ "demoted_from": "hot", "hot_key": hot_key })),
                None,
                None,
            )
            .await?;
        debug!(hot_key, data_id = %outcome.data_id, "demoted hot value to warm");
        Ok(outcome.data_id)
    }

    /// Warm → cold demotion.
    pub async fn warm_to_cold(&self, data_id: &str) -> Result<String> {
        let record = self
            .warm
            .retrieve_by_id(data_id, None)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("warm id {data_id}")))?;
        let frame = match Payload::from_json_value(record.data.clone()).into_frame() {
            Ok(frame) => frame,
            Err(_) => DataFrame::single_cell("data", Value::String(record.data.to_string())),
        };
        let cold_id = self
            .cold
            .store(
                Payload::Frame(frame),
                Some(json!({ "demoted_from": "warm", "warm_data_id": data_id })),
                Some(record.tags),
            )
            .await?;
        debug!(data_id, cold_id, "demoted warm record to cold");
        Ok(cold_id)
    }

    /// Cold → glacier demotion.
    pub async fn cold_to_glacier(&self, data_id: &str, connector: Option<&str>) -> Result<String> {
        let record = self
            .cold
            .retrieve(data_id)
            .await?
            .ok_or_else(|| FabricError::NotFound(format!("cold id {data_id}")))?;
        let key = self
            .glacier
            .store(Payload::Frame(record.data), None, connector)
            .await?;
        let connector_name = connector
            .map(str::to_string)
            .or_else(|| self.glacier.default_name().map(str::to_string))
            .unwrap_or_else(|| "glacier".into());
        self.catalog
            .register(Registration {
                tier: Tier::Glacier,
                location: format!("{connector_name}/{key}"),
                size: 0,
                data_type: "dataframe".into(),
                tags: Vec::new(),
                additional_meta: json!({
                    "demoted_from": "cold",
                    "cold_data_id": data_id,
                }),
            })
            .await?;
        debug!(data_id, key, "demoted cold frame to glacier");
        Ok(key)
    }

    async fn register_promotion(
        &self,
        tier: Tier,
        location: &str,
        tags: &[String],
        meta: Value,
    ) -> Result<()> {
        self.catalog
            .register(Registration {
                tier,
                location: location.to_string(),
                size: 0,
                data_type: "promoted".into(),
                tags: tags.to_vec(),
                additional_meta: meta,
            })
            .await
            .map(|_| ())
    }
}

/// Conversion ladder for glacier payloads landing in cold.
fn frame_from_glacier_value(value: GlacierValue) -> DataFrame {
    match value {
        GlacierValue::Json(json_value) => frame_from_json(json_value),
        GlacierValue::Text(text) => DataFrame::single_cell("data", Value::String(text)),
        GlacierValue::Bytes(bytes) => {
            // Bytes that parse as JSON went down the structured path already;
            // what remains is opaque binary.
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            DataFrame::from_columns(vec![
                ("data".into(), vec![Value::String(encoded)]),
                ("encoding".into(), vec![Value::String("base64".into())]),
                ("original_size".into(), vec![Value::from(bytes.len() as u64)]),
            ])
            .unwrap_or_else(|_| DataFrame::single_cell("data", Value::Null))
        }
    }
}

fn frame_from_json(value: Value) -> DataFrame {
    match Payload::from_json_value(value.clone()).into_frame() {
        Ok(frame) => frame,
        Err(_) => DataFrame::single_cell("data", Value::String(value.to_string())),
    }
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_array_of_records_becomes_columnar() {
        let frame = frame_from_glacier_value(GlacierValue::Json(json!([{"a": 1}, {"a": 2}])));
        assert_eq!(frame.columns(), ["a"]);
        assert_eq!(frame.column("a").unwrap(), &[json!(1), json!(2)]);
    }

    #[test]
    fn scalar_json_wraps_into_single_cell() {
        let frame = frame_from_glacier_value(GlacierValue::Json(json!(42)));
        assert_eq!(frame.num_rows(), 1);
        assert_eq!(frame.columns(), ["data"]);
    }

    #[test]
    fn binary_wraps_as_base64() {
        let frame = frame_from_glacier_value(GlacierValue::Bytes(vec![0xff, 0x00]));
        assert_eq!(frame.column("encoding").unwrap(), &[json!("base64")]);
        assert_eq!(frame.column("original_size").unwrap(), &[json!(2)]);
    }
}
