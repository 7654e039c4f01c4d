//! The glacier facade: connector selection and policy.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use memstrata_core::{FabricError, GlacierConfig, Payload, Result};

use crate::connector::{build_object_store, Connector, GlacierObject, GlacierValue, ObjectStoreConnector};

/// Uniform facade over the named connector set.
///
/// Every call selects a connector: an explicit argument overrides the
/// configured `default_connector`. With no connectors configured, read paths
/// return empty and write paths error; naming a connector that does not
/// exist is always an error.
pub struct GlacierMemory {
    connectors: HashMap<String, Arc<dyn Connector>>,
    default_connector: Option<String>,
}

impl GlacierMemory {
    /// Build every configured connector eagerly. Remote endpoints are only
    /// dialled when a call actually reaches them.
    pub fn from_config(config: &GlacierConfig, local_root: &Path) -> Result<Self> {
        let deadline = Duration::from_secs(config.request_timeout_secs.max(1));
        let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
        for (name, connector_config) in &config.connectors {
            let store = build_object_store(name, connector_config, local_root)?;
            connectors.insert(
                name.clone(),
                Arc::new(ObjectStoreConnector::new(name.clone(), store, deadline)),
            );
            info!(connector = %name, kind = %connector_config.kind, "glacier connector ready");
        }

        let default_connector = config
            .default_connector
            .clone()
            .or_else(|| connectors.keys().min().cloned());

        Ok(Self { connectors, default_connector })
    }

    /// A facade over explicit connector instances. Used by tests.
    pub fn with_connectors(
        connectors: HashMap<String, Arc<dyn Connector>>,
        default_connector: Option<String>,
    ) -> Self {
        let default_connector = default_connector.or_else(|| connectors.keys().min().cloned());
        Self { connectors, default_connector }
    }

    /// Name of the connector used when calls do not pick one.
    pub fn default_name(&self) -> Option<&str> {
        self.default_connector.as_deref()
    }

    pub fn connector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    fn select(&self, explicit: Option<&str>) -> Result<Arc<dyn Connector>> {
        let name = match explicit {
            Some(name) => name,
            None => self
                .default_connector
                .as_deref()
                .ok_or_else(|| FabricError::ConnectorUnknown("no connectors configured".into()))?,
        };
        self.connectors
            .get(name)
            .cloned()
            .ok_or_else(|| FabricError::ConnectorUnknown(name.to_string()))
    }

    /// Store a payload, returning the connector-generated key.
    pub async fn store(
        &self,
        payload: Payload,
        metadata: Option<Map<String, Value>>,
        connector: Option<&str>,
    ) -> Result<String> {
        self.select(connector)?.store(payload, metadata).await
    }

    /// Retrieve by key. An empty connector set reads as absent.
    pub async fn retrieve(&self, key: &str, connector: Option<&str>) -> Result<Option<GlacierValue>> {
        if self.connectors.is_empty() && connector.is_none() {
            return Ok(None);
        }
        self.select(connector)?.retrieve(key).await
    }

    /// List objects under a prefix. An empty connector set lists as empty.
    pub async fn list_objects(
        &self,
        prefix: &str,
        connector: Option<&str>,
    ) -> Result<Vec<GlacierObject>> {
        if self.connectors.is_empty() && connector.is_none() {
            return Ok(Vec::new());
        }
        self.select(connector)?.list_objects(prefix).await
    }

    /// Delete one object.
    pub async fn delete(&self, key: &str, connector: Option<&str>) -> Result<bool> {
        if self.connectors.is_empty() && connector.is_none() {
            return Ok(false);
        }
        self.select(connector)?.delete(key).await
    }

    /// Delete every object of one connector, or of all connectors.
    pub async fn clear(&self, connector: Option<&str>) -> Result<()> {
        let targets: Vec<Arc<dyn Connector>> = match connector {
            Some(name) => vec![self.select(Some(name))?],
            None => self.connectors.values().cloned().collect(),
        };
        for target in targets {
            for object in target.list_objects("").await? {
                if let Err(err) = target.delete(&object.key).await {
                    warn!(connector = target.name(), key = %object.key, "clear failed: {err}");
                }
            }
        }
        Ok(())
    }

    /// Run deferred cleanup on every connector.
    pub async fn cleanup(&self) -> Result<()> {
        for connector in self.connectors.values() {
            connector.cleanup().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facade_with_local(dir: &Path) -> GlacierMemory {
        let mut config = GlacierConfig::default();
        config.connectors.insert(
            "obj".into(),
            memstrata_core::ConnectorConfig {
                kind: "local".into(),
                ..Default::default()
            },
        );
        GlacierMemory::from_config(&config, dir).unwrap()
    }

    #[tokio::test]
    async fn empty_facade_read_paths_are_empty() {
        let facade = GlacierMemory::with_connectors(HashMap::new(), None);
        assert_eq!(facade.retrieve("k", None).await.unwrap(), None);
        assert!(facade.list_objects("", None).await.unwrap().is_empty());
        assert!(!facade.delete("k", None).await.unwrap());
    }

    #[tokio::test]
    async fn empty_facade_write_paths_error() {
        let facade = GlacierMemory::with_connectors(HashMap::new(), None);
        assert!(matches!(
            facade.store(Payload::Text("x".into()), None, None).await,
            Err(FabricError::ConnectorUnknown(_))
        ));
    }

    #[tokio::test]
    async fn explicit_unknown_connector_errors_even_for_reads() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade_with_local(dir.path());
        assert!(matches!(
            facade.retrieve("k", Some("nope")).await,
            Err(FabricError::ConnectorUnknown(_))
        ));
    }

    #[tokio::test]
    async fn store_list_round_trip_through_default() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade_with_local(dir.path());

        let mut payload = Map::new();
        payload.insert("k".into(), json!("v"));
        let mut meta = Map::new();
        meta.insert("t".into(), json!(1));

        let key = facade
            .store(Payload::Map(payload.clone()), Some(meta), Some("obj"))
            .await
            .unwrap();
        let value = facade.retrieve(&key, Some("obj")).await.unwrap().unwrap();
        assert_eq!(value.as_json(), Some(&Value::Object(payload)));

        let objects = facade.list_objects("", None).await.unwrap();
        assert!(objects.iter().any(|o| o.key == key && o.size > 0));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade_with_local(dir.path());
        facade
            .store(Payload::Text("a".into()), None, None)
            .await
            .unwrap();
        facade.clear(None).await.unwrap();
        assert!(facade.list_objects("", None).await.unwrap().is_empty());
    }
}
