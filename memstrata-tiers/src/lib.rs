//! # Memstrata Tier Implementations
//!
//! ## Overview
//!
//! The four in-process tiers of the memory fabric, ordered by latency:
//!
//! 1. **Red-hot**: fixed-dimension vector index with nearest-neighbour search
//!    and per-vector metadata. Sub-millisecond, RAM-resident, mirrored to
//!    disk.
//! 2. **Hot**: key/value with TTL, counters and glob listing. Backed by an
//!    external cache when one answers the construction-time probe, otherwise
//!    by an in-process map with identical semantics.
//! 3. **Warm**: named relational databases with a tagged JSON record table,
//!    user-imported tables, and CSV/database import.
//! 4. **Cold**: analytical store for frame-shaped data plus registration of
//!    external columnar files described without loading their payloads.
//!
//! The fifth tier, glacier, lives in its own crate because it is a facade
//! over remote connectors rather than a local store.
//!
//! ## Catalog coupling
//!
//! Every successful write ends with a catalog registration, and the catalog
//! write happens *before* the operation reports success. On a tier-write
//! failure the catalog is untouched; on a catalog failure after a successful
//! tier write the tier write is rolled back (warm/cold), deleted (hot), or
//! tombstoned (red-hot).
//!
//! ## Concurrency
//!
//! Each tier is internally synchronised and may be called from multiple
//! worker threads. Long operations (batch import) check a cancellation token
//! between files and never block unrelated tiers.

mod cold;
mod hot;
mod red_hot;
mod warm;

pub use cold::{BatchImportReport, ColdFileInfo, ColdMemory, ColdRecord};
pub use hot::{HotBackend, HotMemory, MemoryBackend, RedisBackend};
pub use red_hot::{RedHotHit, RedHotMemory, VectorRecord};
pub use warm::{WarmImportOutcome, WarmMemory, WarmRecord, WarmStoreOutcome};
