//! Red-hot memory: the warmest tier.
//!
//! A fixed-dimension f32 vector store answering L2 nearest-neighbour queries
//! with per-vector metadata and tags. Two index flavours exist behind one
//! interface: exact exhaustive search (`Flat`, the default) and an
//! inverted-file coarse quantizer (`IVF`) for large instances.
//!
//! State is mirrored to disk as a pair of files, `index.bin` (binary dump of
//! the index) and `metadata.json` (per-key records), rewritten atomically
//! via temp-file-plus-rename every `save_interval` inserts and on demand. On
//! startup a lone temp file is discarded and corrupt state falls back to an
//! empty index rather than failing construction.
//!
//! Deletion tombstones: the vector keeps its slot and is skipped on reads;
//! compaction is deferred to `clear()`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use memstrata_core::{
    FabricError, FlatIndex, IndexKind, RedHotConfig, Result, SchemaDescriptor, SchemaType,
};

const INDEX_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";

/// Number of coarse cells for the IVF flavour.
const IVF_NLIST: usize = 100;
/// Cells probed per IVF query.
const IVF_NPROBE: usize = 8;

/// Per-key record mirrored in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Positional slot in the index, assigned at insertion.
    pub slot: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct RedHotHit {
    pub key: String,
    /// Squared L2 distance to the query.
    pub distance: f32,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Index flavours behind one add/search interface.
#[derive(Debug, Serialize, Deserialize)]
enum VectorIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl VectorIndex {
    fn new(kind: IndexKind, dim: usize) -> Self {
        match kind {
            IndexKind::Flat => VectorIndex::Flat(FlatIndex::new(dim)),
            IndexKind::Ivf => VectorIndex::Ivf(IvfIndex::new(dim, IVF_NLIST, IVF_NPROBE)),
        }
    }

    fn dim(&self) -> usize {
        match self {
            VectorIndex::Flat(i) => i.dim(),
            VectorIndex::Ivf(i) => i.vectors.dim(),
        }
    }

    fn len(&self) -> usize {
        match self {
            VectorIndex::Flat(i) => i.len(),
            VectorIndex::Ivf(i) => i.vectors.len(),
        }
    }

    fn add(&mut self, vector: &[f32]) -> Result<usize> {
        match self {
            VectorIndex::Flat(i) => i.add(vector),
            VectorIndex::Ivf(i) => i.add(vector),
        }
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        keep: impl FnMut(usize) -> bool,
    ) -> Result<Vec<(usize, f32)>> {
        match self {
            VectorIndex::Flat(i) => i.search(query, k, keep),
            VectorIndex::Ivf(i) => i.search(query, k, keep),
        }
    }
}

/// Inverted-file index: a flat coarse quantizer over cell centroids plus one
/// posting list per cell. The first `nlist` inserted vectors seed the
/// centroids; until then search degrades to exhaustive scan.
#[derive(Debug, Serialize, Deserialize)]
struct IvfIndex {
    nlist: usize,
    nprobe: usize,
    centroids: FlatIndex,
    lists: Vec<Vec<usize>>,
    vectors: FlatIndex,
}

impl IvfIndex {
    fn new(dim: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            nlist,
            nprobe,
            centroids: FlatIndex::new(dim),
            lists: Vec::new(),
            vectors: FlatIndex::new(dim),
        }
    }

    fn trained(&self) -> bool {
        self.centroids.len() >= self.nlist
    }

    fn add(&mut self, vector: &[f32]) -> Result<usize> {
        let slot = self.vectors.add(vector)?;
        if !self.trained() {
            self.centroids.add(vector)?;
            self.lists.push(vec![slot]);
            return Ok(slot);
        }
        let cell = self
            .centroids
            .search(vector, 1, |_| true)?
            .first()
            .map(|(c, _)| *c)
            .unwrap_or(0);
        self.lists[cell].push(slot);
        Ok(slot)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        mut keep: impl FnMut(usize) -> bool,
    ) -> Result<Vec<(usize, f32)>> {
        if !self.trained() {
            return self.vectors.search(query, k, keep);
        }
        let probes = self.centroids.search(query, self.nprobe, |_| true)?;
        let mut hits: Vec<(usize, f32)> = Vec::new();
        for (cell, _) in probes {
            for &slot in &self.lists[cell] {
                if !keep(slot) {
                    continue;
                }
                if let Some(stored) = self.vectors.vector(slot) {
                    hits.push((slot, memstrata_core::squared_l2(query, stored)));
                }
            }
        }
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[derive(Debug)]
struct RedHotState {
    index: VectorIndex,
    records: HashMap<String, VectorRecord>,
    /// slot → key, kept parallel with the index.
    slots: Vec<String>,
    inserts_since_flush: usize,
}

impl RedHotState {
    fn live_count(&self) -> usize {
        self.records.values().filter(|r| !r.deleted).count()
    }
}

/// The red-hot tier.
#[derive(Debug)]
pub struct RedHotMemory {
    dim: usize,
    max_size: usize,
    save_interval: usize,
    kind: IndexKind,
    storage_path: PathBuf,
    state: RwLock<RedHotState>,
}

impl RedHotMemory {
    /// Open red-hot memory under `storage_path`, restoring any persisted
    /// state. Corruption is logged and replaced with an empty index.
    pub async fn open(config: &RedHotConfig, storage_path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(storage_path)
            .await
            .map_err(|e| FabricError::backend_ctx("red_hot mkdir", e))?;

        if config.use_gpu {
            warn!("red_hot: use_gpu requested but the in-process index is CPU-only");
        }

        discard_stale_temp_files(storage_path);

        let state = match load_state(config, storage_path) {
            Ok(Some(state)) => {
                info!(
                    vectors = state.index.len(),
                    "red_hot restored persisted state from {:?}", storage_path
                );
                state
            }
            Ok(None) => fresh_state(config),
            Err(err) => {
                warn!("red_hot state corrupt, reinitialising empty: {err}");
                fresh_state(config)
            }
        };

        Ok(Self {
            dim: config.vector_dim,
            max_size: config.max_size,
            save_interval: config.save_interval.max(1),
            kind: config.index_type,
            storage_path: storage_path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Live (non-tombstoned) vector count.
    pub async fn len(&self) -> usize {
        self.state.read().await.live_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Store a vector under `key`. At capacity the oldest live entry is
    /// evicted first. Storing an existing key tombstones its old slot.
    pub async fn store(
        &self,
        key: &str,
        vector: &[f32],
        metadata: Option<Map<String, Value>>,
        tags: Option<Vec<String>>,
    ) -> Result<()> {
        if vector.len() != self.dim {
            return Err(FabricError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state.records.get_mut(key) {
            existing.deleted = true;
        }

        if state.live_count() >= self.max_size {
            evict_oldest(&mut state);
        }

        let slot = state.index.add(vector)?;
        state.slots.push(key.to_string());
        state.records.insert(
            key.to_string(),
            VectorRecord {
                slot,
                metadata: metadata.unwrap_or_default(),
                tags: tags.unwrap_or_default(),
                created_at: Utc::now(),
                deleted: false,
            },
        );

        state.inserts_since_flush += 1;
        if state.inserts_since_flush >= self.save_interval {
            self.persist(&mut state)?;
        }
        debug!(key, slot, "red_hot stored vector");
        Ok(())
    }

    /// L2 kNN search. Tag filtering happens after the index search with a
    /// widened internal k so filtered results can still fill `k` hits. Ties
    /// on distance resolve to the earliest `created_at` (insertion order).
    pub async fn retrieve(
        &self,
        query: &[f32],
        k: usize,
        tags: Option<&[String]>,
    ) -> Result<Vec<RedHotHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = tags.map(|t| t.to_vec()).unwrap_or_default();
        let state = self.state.read().await;

        if state.index.len() == 0 {
            if query.len() != self.dim {
                return Err(FabricError::DimensionMismatch {
                    expected: self.dim,
                    actual: query.len(),
                });
            }
            return Ok(Vec::new());
        }

        // Widen the search when post-filtering on tags would starve k.
        let internal_k = if wanted.is_empty() { k } else { k.saturating_mul(4).max(k) };

        let slots = &state.slots;
        let records = &state.records;
        let live = |slot: usize| {
            slots
                .get(slot)
                .and_then(|key| records.get(key))
                .map(|r| r.slot == slot && !r.deleted)
                .unwrap_or(false)
        };

        let raw = state.index.search(query, internal_k, live)?;

        let mut hits = Vec::with_capacity(k);
        for (slot, distance) in raw {
            let key = &state.slots[slot];
            let record = match state.records.get(key) {
                Some(r) => r,
                None => continue,
            };
            if !wanted.is_empty() && !wanted.iter().all(|t| record.tags.contains(t)) {
                continue;
            }
            hits.push(RedHotHit {
                key: key.clone(),
                distance,
                metadata: record.metadata.clone(),
                tags: record.tags.clone(),
                created_at: record.created_at,
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Tombstone a key. Returns whether it existed and was live. The vector
    /// slot stays in the index and is skipped on reads.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.records.get_mut(key) {
            Some(record) if !record.deleted => {
                record.deleted = true;
                debug!(key, "red_hot tombstoned");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop all vectors and metadata and reinitialise the index. This is
    /// also where tombstoned slots are finally reclaimed.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.index = VectorIndex::new(self.kind, self.dim);
        state.records.clear();
        state.slots.clear();
        state.inserts_since_flush = 0;
        self.persist(&mut state)?;
        info!("red_hot cleared");
        Ok(())
    }

    /// Schema descriptor for a stored vector.
    pub async fn get_schema(&self, key: &str) -> Result<Option<SchemaDescriptor>> {
        let state = self.state.read().await;
        let record = match state.records.get(key) {
            Some(r) if !r.deleted => r,
            _ => return Ok(None),
        };
        let descriptor = SchemaDescriptor::new(SchemaType::Vector, "vector")
            .with_fields(record.metadata.keys().cloned().collect())
            .with_detail("dimension", json!(self.dim))
            .with_detail("metadata", Value::Object(record.metadata.clone()))
            .with_detail("tags", json!(record.tags));
        Ok(Some(descriptor))
    }

    /// Fetch the record for a key, tombstoned or not.
    pub async fn record(&self, key: &str) -> Option<VectorRecord> {
        self.state.read().await.records.get(key).cloned()
    }

    /// The stored vector for a live key.
    pub async fn vector(&self, key: &str) -> Option<Vec<f32>> {
        let state = self.state.read().await;
        let record = state.records.get(key).filter(|r| !r.deleted)?;
        match &state.index {
            VectorIndex::Flat(index) => index.vector(record.slot).map(<[f32]>::to_vec),
            VectorIndex::Ivf(index) => index.vectors.vector(record.slot).map(<[f32]>::to_vec),
        }
    }

    /// Flush state to disk immediately.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.persist(&mut state)
    }

    fn persist(&self, state: &mut RedHotState) -> Result<()> {
        let index_bytes = bincode::serialize(&state.index)
            .map_err(|e| FabricError::backend_ctx("red_hot serialize", e))?;
        let metadata_bytes = serde_json::to_vec(&state.records)?;

        write_atomic(&self.storage_path.join(INDEX_FILE), &index_bytes)?;
        write_atomic(&self.storage_path.join(METADATA_FILE), &metadata_bytes)?;

        state.inserts_since_flush = 0;
        debug!(vectors = state.index.len(), "red_hot state flushed");
        Ok(())
    }
}

fn fresh_state(config: &RedHotConfig) -> RedHotState {
    RedHotState {
        index: VectorIndex::new(config.index_type, config.vector_dim),
        records: HashMap::new(),
        slots: Vec::new(),
        inserts_since_flush: 0,
    }
}

fn evict_oldest(state: &mut RedHotState) {
    let oldest = state
        .records
        .iter()
        .filter(|(_, r)| !r.deleted)
        .min_by_key(|(_, r)| r.created_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        if let Some(record) = state.records.get_mut(&key) {
            record.deleted = true;
        }
        debug!(key, "red_hot evicted oldest live entry");
    }
}

fn load_state(config: &RedHotConfig, dir: &Path) -> Result<Option<RedHotState>> {
    let index_path = dir.join(INDEX_FILE);
    let metadata_path = dir.join(METADATA_FILE);
    if !index_path.exists() || !metadata_path.exists() {
        return Ok(None);
    }

    let index: VectorIndex = bincode::deserialize(&std::fs::read(&index_path)?)
        .map_err(|e| FabricError::backend_ctx("red_hot index load", e))?;
    if index.dim() != config.vector_dim {
        return Err(FabricError::DimensionMismatch {
            expected: config.vector_dim,
            actual: index.dim(),
        });
    }

    let mut records: HashMap<String, VectorRecord> =
        serde_json::from_slice(&std::fs::read(&metadata_path)?)?;

    // Drop trailing corruption: records pointing past the index are from a
    // write that never made it to index.bin.
    let total = index.len();
    records.retain(|_, r| r.slot < total);

    let mut slots = vec![String::new(); total];
    for (key, record) in &records {
        slots[record.slot] = key.clone();
    }

    Ok(Some(RedHotState {
        index,
        records,
        slots,
        inserts_since_flush: 0,
    }))
}

fn discard_stale_temp_files(dir: &Path) {
    for name in [INDEX_FILE, METADATA_FILE] {
        let tmp = dir.join(format!("{name}.tmp"));
        if tmp.exists() {
            warn!("red_hot discarding stale temp file {:?}", tmp);
            let _ = std::fs::remove_file(tmp);
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dim: usize, max_size: usize) -> RedHotConfig {
        RedHotConfig {
            vector_dim: dim,
            max_size,
            save_interval: 2,
            ..RedHotConfig::default()
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn store_then_retrieve_exact() {
        let dir = tempfile::tempdir().unwrap();
        let memory = RedHotMemory::open(&config(128, 100), dir.path()).await.unwrap();

        let mut meta = Map::new();
        meta.insert("src".into(), json!("t"));
        memory
            .store("a", &unit(128, 0), Some(meta), None)
            .await
            .unwrap();

        let hits = memory.retrieve(&unit(128, 0), 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
        assert!(hits[0].distance < 1e-5);
        assert_eq!(hits[0].metadata["src"], json!("t"));
    }

    #[tokio::test]
    async fn deleted_key_never_returns() {
        let dir = tempfile::tempdir().unwrap();
        let memory = RedHotMemory::open(&config(8, 100), dir.path()).await.unwrap();
        memory.store("gone", &unit(8, 1), None, None).await.unwrap();
        assert!(memory.delete("gone").await.unwrap());
        assert!(!memory.delete("gone").await.unwrap());
        let hits = memory.retrieve(&unit(8, 1), 5, None).await.unwrap();
        assert!(hits.iter().all(|h| h.key != "gone"));
    }

    #[tokio::test]
    async fn eviction_keeps_len_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let memory = RedHotMemory::open(&config(4, 3), dir.path()).await.unwrap();
        for i in 0..5 {
            memory
                .store(&format!("k{i}"), &unit(4, i % 4), None, None)
                .await
                .unwrap();
        }
        assert!(memory.len().await <= 3);
        // The oldest entries were evicted first.
        assert!(memory.record("k0").await.unwrap().deleted);
        assert!(memory.record("k1").await.unwrap().deleted);
        assert!(!memory.record("k4").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let memory = RedHotMemory::open(&config(16, 10), dir.path()).await.unwrap();
        let err = memory.store("bad", &unit(8, 0), None, None).await;
        assert!(matches!(
            err,
            Err(FabricError::DimensionMismatch { expected: 16, actual: 8 })
        ));
        assert_eq!(memory.len().await, 0);
    }

    #[tokio::test]
    async fn tag_filter_post_filters() {
        let dir = tempfile::tempdir().unwrap();
        let memory = RedHotMemory::open(&config(4, 10), dir.path()).await.unwrap();
        memory
            .store("tagged", &unit(4, 0), None, Some(vec!["geo".into()]))
            .await
            .unwrap();
        memory.store("plain", &unit(4, 0), None, None).await.unwrap();

        let tags = vec!["geo".to_string()];
        let hits = memory
            .retrieve(&unit(4, 0), 2, Some(&tags))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "tagged");
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = RedHotMemory::open(&config(4, 10), dir.path()).await.unwrap();
            memory.store("persist", &unit(4, 2), None, None).await.unwrap();
            memory.flush().await.unwrap();
        }
        let memory = RedHotMemory::open(&config(4, 10), dir.path()).await.unwrap();
        let hits = memory.retrieve(&unit(4, 2), 1, None).await.unwrap();
        assert_eq!(hits[0].key, "persist");
    }

    #[tokio::test]
    async fn corrupt_state_reinitialises_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"not an index").unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), b"{}").unwrap();
        let memory = RedHotMemory::open(&config(4, 10), dir.path()).await.unwrap();
        assert_eq!(memory.len().await, 0);
    }

    #[tokio::test]
    async fn ivf_index_finds_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(4, 1000);
        cfg.index_type = IndexKind::Ivf;
        let memory = RedHotMemory::open(&cfg, dir.path()).await.unwrap();
        for i in 0..20 {
            memory
                .store(&format!("v{i}"), &unit(4, i % 4), None, None)
                .await
                .unwrap();
        }
        let hits = memory.retrieve(&unit(4, 3), 1, None).await.unwrap();
        assert!(hits[0].distance < 1e-5);
    }
}
