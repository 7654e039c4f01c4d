//! Hot memory: process-local key/value with TTL.
//!
//! Prefers an external cache (Redis) when its ping answers within a short
//! probe timeout at construction, and otherwise falls back to an in-process
//! concurrent map. Both backends expose the same observable behaviour: JSON
//! values, lazy TTL expiry, glob key listing and atomic counters.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use memstrata_core::{FabricError, HotConfig, Result, SchemaDescriptor, SchemaType};

/// How long the construction-time probe waits for the external cache.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Storage backend contract for hot memory. Values are opaque JSON strings;
/// expiry is a TTL in seconds from the write.
#[async_trait]
pub trait HotBackend: Send + Sync {
    async fn set(&self, key: &str, value: String, expiry: Option<u64>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;
    async fn clear(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// External cache backend.
pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

#[async_trait]
impl HotBackend for RedisBackend {
    async fn set(&self, key: &str, value: String, expiry: Option<u64>) -> Result<()> {
        let mut conn = self.manager.clone();
        match expiry {
            Some(seconds) => conn
                .set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(|e| FabricError::backend_ctx("redis set_ex", e)),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| FabricError::backend_ctx("redis set", e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| FabricError::backend_ctx("redis get", e))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| FabricError::backend_ctx("redis del", e))?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| FabricError::backend_ctx("redis keys", e))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, amount)
            .await
            .map_err(|e| FabricError::backend_ctx("redis incr", e))
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| FabricError::backend_ctx("redis flushdb", e))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    /// Absolute expiry in epoch seconds; `None` never expires.
    expires_at: Option<u64>,
}

impl StoredEntry {
    fn expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process fallback backend with the same observable semantics.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl HotBackend for MemoryBackend {
    async fn set(&self, key: &str, value: String, expiry: Option<u64>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: expiry.map(|ttl| epoch_now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = epoch_now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expired(now) {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = globset::Glob::new(pattern)
            .map_err(|e| FabricError::backend_ctx("glob", e))?
            .compile_matcher();
        let now = epoch_now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().expired(now))
            .map(|entry| entry.key().clone())
            .filter(|key| matcher.is_match(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let now = epoch_now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry { value: "0".into(), expires_at: None });
        if entry.expired(now) {
            entry.value = "0".into();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|e| FabricError::backend_ctx("increment", e))?;
        let next = current + amount;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// The hot tier.
pub struct HotMemory {
    backend: Box<dyn HotBackend>,
}

impl HotMemory {
    /// Connect according to configuration: probe the external cache when one
    /// is configured, fall back to the in-process map otherwise.
    pub async fn connect(config: &HotConfig) -> Self {
        if let Some(url) = &config.external_cache_url {
            match probe_redis(url, config.external_cache_db).await {
                Ok(manager) => {
                    info!("hot memory connected to external cache at {url}");
                    return Self { backend: Box::new(RedisBackend { manager }) };
                }
                Err(err) => {
                    warn!("external cache unavailable ({err}), falling back to in-memory storage");
                }
            }
        }
        Self::in_memory()
    }

    /// Force the in-process backend. Used by tests and cache-less deployments.
    pub fn in_memory() -> Self {
        Self { backend: Box::new(MemoryBackend::new()) }
    }

    /// Which backend answered the probe.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Create (or overwrite) a key with a JSON value and optional TTL in
    /// seconds.
    pub async fn create(&self, key: &str, value: &Value, expiry: Option<u64>) -> Result<bool> {
        let serialized = serde_json::to_string(value)?;
        self.backend.set(key, serialized, expiry).await?;
        debug!(key, backend = self.backend.name(), "hot create");
        Ok(true)
    }

    /// Read a value. Expired entries are invisible and may be removed.
    pub async fn read(&self, key: &str) -> Result<Option<Value>> {
        match self.backend.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                // Counters written by INCR are bare integers already; other
                // non-JSON values surface as strings.
                Err(_) => Ok(Some(Value::String(raw))),
            },
            None => Ok(None),
        }
    }

    /// Overwrite an existing key, keeping create semantics. Returns `false`
    /// when the key does not exist.
    pub async fn update(&self, key: &str, value: &Value, expiry: Option<u64>) -> Result<bool> {
        if self.backend.get(key).await?.is_none() {
            return Ok(false);
        }
        self.create(key, value, expiry).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(key).await
    }

    /// List keys matching a glob pattern (`*`, `?`).
    pub async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.backend.keys(pattern).await
    }

    /// Atomically add `amount`, creating the counter at zero if absent.
    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.backend.increment(key, amount).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Infer a schema descriptor from the stored value. Dispatcher-written
    /// entries wrap payloads in an envelope whose `data` field carries the
    /// actual artifact; bare values are described directly.
    pub async fn get_schema(&self, key: &str) -> Result<Option<SchemaDescriptor>> {
        let value = match self.read(key).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let subject = value.get("data").unwrap_or(&value);
        Ok(Some(describe_value(subject)))
    }
}

fn describe_value(value: &Value) -> SchemaDescriptor {
    match value {
        Value::Object(map) => SchemaDescriptor::new(SchemaType::Dict, "hot")
            .with_fields(map.keys().cloned().collect()),
        Value::Array(items) => {
            if items.iter().all(|v| v.is_number()) && !items.is_empty() {
                SchemaDescriptor::new(SchemaType::Vector, "hot")
                    .with_detail("dimension", json!(items.len()))
            } else if items.iter().all(|v| v.is_object()) && !items.is_empty() {
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
                SchemaDescriptor::new(SchemaType::ListOfDicts, "hot").with_fields(fields)
            } else {
                SchemaDescriptor::unknown("hot")
            }
        }
        _ => SchemaDescriptor::unknown("hot"),
    }
}

async fn probe_redis(
    url: &str,
    db: Option<i64>,
) -> anyhow::Result<redis::aio::ConnectionManager> {
    // Append the database number unless the URL already carries one as its
    // final path segment.
    let has_db_segment = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    let url = match db {
        Some(db) if !has_db_segment => format!("{}/{}", url.trim_end_matches('/'), db),
        _ => url.to_string(),
    };
    let client = redis::Client::open(url.as_str())?;
    let mut manager = tokio::time::timeout(PROBE_TIMEOUT, client.get_tokio_connection_manager())
        .await
        .map_err(|_| anyhow::anyhow!("connection probe timed out"))??;
    let pong: String = tokio::time::timeout(
        PROBE_TIMEOUT,
        redis::cmd("PING").query_async(&mut manager),
    )
    .await
    .map_err(|_| anyhow::anyhow!("ping timed out"))??;
    anyhow::ensure!(pong == "PONG", "unexpected ping reply: {pong}");
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_read_round_trip() {
        let hot = HotMemory::in_memory();
        let value = json!({"name": "John", "age": 30});
        assert!(hot.create("user:1", &value, None).await.unwrap());
        assert_eq!(hot.read("user:1").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let hot = HotMemory::in_memory();
        hot.create("ephemeral", &json!(1), Some(0)).await.unwrap();
        assert_eq!(hot.read("ephemeral").await.unwrap(), None);
        assert!(hot.list_keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_requires_existing_key() {
        let hot = HotMemory::in_memory();
        assert!(!hot.update("absent", &json!(1), None).await.unwrap());
        hot.create("present", &json!(1), None).await.unwrap();
        assert!(hot.update("present", &json!(2), None).await.unwrap());
        assert_eq!(hot.read("present").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn glob_listing() {
        let hot = HotMemory::in_memory();
        hot.create("user:1", &json!(1), None).await.unwrap();
        hot.create("user:2", &json!(2), None).await.unwrap();
        hot.create("visits", &json!(0), None).await.unwrap();
        let keys = hot.list_keys("user:*").await.unwrap();
        assert_eq!(keys, vec!["user:1", "user:2"]);
        let keys = hot.list_keys("user:?").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn counters() {
        let hot = HotMemory::in_memory();
        hot.create("visits", &json!(0), None).await.unwrap();
        assert_eq!(hot.increment("visits", 1).await.unwrap(), 1);
        assert_eq!(hot.increment("visits", 5).await.unwrap(), 6);
        assert_eq!(hot.increment("fresh", 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let hot = HotMemory::in_memory();
        hot.create("a", &json!(1), None).await.unwrap();
        assert!(hot.delete("a").await.unwrap());
        assert!(!hot.delete("a").await.unwrap());
        hot.create("b", &json!(1), None).await.unwrap();
        hot.clear().await.unwrap();
        assert_eq!(hot.read("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn schema_inference() {
        let hot = HotMemory::in_memory();
        hot.create("doc", &json!({"data": {"name": "x", "height": 2}}), None)
            .await
            .unwrap();
        let schema = hot.get_schema("doc").await.unwrap().unwrap();
        assert_eq!(schema.type_tag, SchemaType::Dict);
        assert!(schema.fields.contains(&"name".to_string()));

        hot.create("vec", &json!([0.1, 0.2, 0.3]), None).await.unwrap();
        let schema = hot.get_schema("vec").await.unwrap().unwrap();
        assert_eq!(schema.type_tag, SchemaType::Vector);
    }
}
