//! Object-store connectors.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use memstrata_core::{ConnectorConfig, FabricError, Payload, Result};

/// Prefix under which per-object user metadata sidecars live. Sidecars are
/// invisible to listings.
const META_PREFIX: &str = ".meta";

/// A value read back from glacier, after the JSON → UTF-8 → raw decode
/// ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum GlacierValue {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl GlacierValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            GlacierValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Raw byte view regardless of how the value decoded.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            GlacierValue::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            GlacierValue::Text(t) => t.as_bytes().to_vec(),
            GlacierValue::Bytes(b) => b.clone(),
        }
    }
}

/// One listed object with its provider-side metadata.
#[derive(Debug, Clone)]
pub struct GlacierObject {
    pub key: String,
    pub size: u64,
    pub updated: DateTime<Utc>,
    pub content_type: Option<String>,
    pub user_metadata: Map<String, Value>,
}

/// Contract every glacier connector satisfies. Each connector owns its own
/// key space; the fabric never fabricates keys across connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Store a payload, returning the generated key.
    async fn store(&self, payload: Payload, metadata: Option<Map<String, Value>>)
        -> Result<String>;

    async fn retrieve(&self, key: &str) -> Result<Option<GlacierValue>>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<GlacierObject>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Release resources and finish deferred deletions of timed-out uploads.
    async fn cleanup(&self) -> Result<()>;
}

/// Connector over any `object_store` backend.
pub struct ObjectStoreConnector {
    name: String,
    store: Arc<dyn ObjectStore>,
    deadline: Duration,
    /// Keys whose upload timed out and may exist partially on the remote.
    pending_cleanup: Mutex<Vec<String>>,
}

impl ObjectStoreConnector {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>, deadline: Duration) -> Self {
        Self {
            name: name.into(),
            store,
            deadline,
            pending_cleanup: Mutex::new(Vec::new()),
        }
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = object_store::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(|e| FabricError::backend_ctx(&self.name, e)),
            Err(_) => Err(FabricError::Timeout(self.deadline)),
        }
    }

    async fn read_sidecar(&self, key: &str) -> (Option<String>, Map<String, Value>) {
        let path = ObjectPath::from(format!("{META_PREFIX}/{key}"));
        let result = tokio::time::timeout(self.deadline, async {
            self.store.get(&path).await?.bytes().await
        })
        .await;
        if let Ok(Ok(bytes)) = result {
            if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&bytes) {
                let content_type = map
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let user = map
                    .get("user_metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                return (content_type, user);
            }
        }
        (None, Map::new())
    }
}

#[async_trait]
impl Connector for ObjectStoreConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(
        &self,
        payload: Payload,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        let (bytes, content_type) = encode_payload(&payload)?;
        let sidecar = serde_json::to_vec(&json!({
            "content_type": content_type,
            "user_metadata": metadata.unwrap_or_default(),
        }))?;

        let object_path = ObjectPath::from(key.clone());
        let sidecar_path = ObjectPath::from(format!("{META_PREFIX}/{key}"));

        let upload = async {
            self.store.put(&object_path, Bytes::from(bytes)).await?;
            self.store.put(&sidecar_path, Bytes::from(sidecar)).await?;
            Ok::<(), object_store::Error>(())
        };
        match tokio::time::timeout(self.deadline, upload).await {
            Ok(Ok(())) => {
                debug!(connector = %self.name, key, "glacier stored object");
                Ok(key)
            }
            Ok(Err(e)) => Err(FabricError::backend_ctx(&self.name, e)),
            Err(_) => {
                // The upload may have landed partially; defer the delete so
                // the caller sees a clean timeout with no lingering state.
                self.pending_cleanup.lock().await.push(key);
                Err(FabricError::Timeout(self.deadline))
            }
        }
    }

    async fn retrieve(&self, key: &str) -> Result<Option<GlacierValue>> {
        let path = ObjectPath::from(key.to_string());
        let fetched = tokio::time::timeout(self.deadline, async {
            self.store.get(&path).await?.bytes().await
        })
        .await;
        match fetched {
            Ok(Ok(bytes)) => Ok(Some(decode_bytes(&bytes))),
            Ok(Err(e)) if is_not_found(&e) => Ok(None),
            Ok(Err(e)) => Err(FabricError::backend_ctx(&self.name, e)),
            Err(_) => Err(FabricError::Timeout(self.deadline)),
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<GlacierObject>> {
        let list_prefix = if prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(prefix.to_string()))
        };
        let metas: Vec<object_store::ObjectMeta> = self
            .with_deadline(
                self.store
                    .list(list_prefix.as_ref())
                    .try_collect::<Vec<_>>(),
            )
            .await?;

        let mut objects = Vec::with_capacity(metas.len());
        for meta in metas {
            let key = meta.location.to_string();
            if key.starts_with(META_PREFIX) {
                continue;
            }
            let (content_type, user_metadata) = self.read_sidecar(&key).await;
            objects.push(GlacierObject {
                key,
                size: meta.size as u64,
                updated: meta.last_modified,
                content_type,
                user_metadata,
            });
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = ObjectPath::from(key.to_string());
        let existed = match tokio::time::timeout(self.deadline, self.store.delete(&path)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) if is_not_found(&e) => false,
            Ok(Err(e)) => return Err(FabricError::backend_ctx(&self.name, e)),
            Err(_) => return Err(FabricError::Timeout(self.deadline)),
        };
        let sidecar = ObjectPath::from(format!("{META_PREFIX}/{key}"));
        if let Ok(Err(e)) = tokio::time::timeout(self.deadline, self.store.delete(&sidecar)).await {
            if !is_not_found(&e) {
                warn!(connector = %self.name, key, "sidecar delete failed: {e}");
            }
        }
        Ok(existed)
    }

    async fn cleanup(&self) -> Result<()> {
        let pending: Vec<String> = self.pending_cleanup.lock().await.drain(..).collect();
        for key in pending {
            if let Err(err) = self.delete(&key).await {
                warn!(connector = %self.name, key, "cleanup delete failed: {err}");
            }
        }
        Ok(())
    }
}

fn is_not_found(error: &object_store::Error) -> bool {
    matches!(error, object_store::Error::NotFound { .. })
}

fn encode_payload(payload: &Payload) -> Result<(Vec<u8>, &'static str)> {
    match payload {
        Payload::Bytes(b) => Ok((b.clone(), "application/octet-stream")),
        Payload::Text(t) => Ok((t.as_bytes().to_vec(), "text/plain")),
        structured => Ok((
            serde_json::to_vec(&structured.to_json_value()?)?,
            "application/json",
        )),
    }
}

/// Decode ladder: JSON first, then UTF-8 text, then raw bytes.
fn decode_bytes(bytes: &[u8]) -> GlacierValue {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return GlacierValue::Json(value);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => GlacierValue::Text(text.to_string()),
        Err(_) => GlacierValue::Bytes(bytes.to_vec()),
    }
}

/// Build the `object_store` backend for one connector configuration.
pub fn build_object_store(
    name: &str,
    config: &ConnectorConfig,
    local_root: &Path,
) -> Result<Arc<dyn ObjectStore>> {
    match config.kind.as_str() {
        "s3" => {
            let mut builder = object_store::aws::AmazonS3Builder::from_env();
            if let Some(bucket) = &config.bucket {
                builder = builder.with_bucket_name(bucket);
            }
            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(key) = &config.access_key_id {
                builder = builder.with_access_key_id(key);
            }
            if let Some(secret) = &config.secret_access_key {
                builder = builder.with_secret_access_key(secret);
            }
            Ok(Arc::new(builder.build().map_err(|e| {
                FabricError::ConfigInvalid(format!("connector {name}: {e}"))
            })?))
        }
        "gcs" => {
            let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env();
            if let Some(bucket) = &config.bucket {
                builder = builder.with_bucket_name(bucket);
            }
            if let Some(path) = &config.service_account_path {
                builder = builder.with_service_account_path(path);
            }
            Ok(Arc::new(builder.build().map_err(|e| {
                FabricError::ConfigInvalid(format!("connector {name}: {e}"))
            })?))
        }
        "azure" => {
            let mut builder = object_store::azure::MicrosoftAzureBuilder::from_env();
            if let Some(account) = &config.account {
                builder = builder.with_account(account);
            }
            if let Some(container) = &config.container {
                builder = builder.with_container_name(container);
            }
            Ok(Arc::new(builder.build().map_err(|e| {
                FabricError::ConfigInvalid(format!("connector {name}: {e}"))
            })?))
        }
        "local" => {
            let root = config.root.clone().unwrap_or_else(|| local_root.join(name));
            std::fs::create_dir_all(&root)?;
            Ok(Arc::new(
                object_store::local::LocalFileSystem::new_with_prefix(&root).map_err(|e| {
                    FabricError::ConfigInvalid(format!("connector {name}: {e}"))
                })?,
            ))
        }
        other => Err(FabricError::ConfigInvalid(format!(
            "connector {name}: unknown connector type {other:?}"
        ))),
    }
}
