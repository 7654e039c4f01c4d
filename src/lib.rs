//! # Memstrata
//!
//! A tiered memory fabric for heterogeneous data artifacts (vectors,
//! tabular rows, JSON documents, binary blobs) with a uniform
//! store/retrieve/promote/demote API over five storage tiers ordered by
//! latency and cost:
//!
//! | tier    | backing                                   | typical latency |
//! |---------|-------------------------------------------|-----------------|
//! | red-hot | in-process vector index                   | microseconds    |
//! | hot     | external cache or in-process map, TTL     | sub-millisecond |
//! | warm    | embedded relational store, tags + schemas | milliseconds    |
//! | cold    | analytical store + external columnar files| tens of ms      |
//! | glacier | remote object stores + data sources       | network bound   |
//!
//! A durable **catalog** tracks every artifact across tiers; a **schema
//! index** vectorises schema descriptors so natural-language queries can
//! discover where relevant data lives and what queries it supports; and a
//! **prioritised search** walks the tiers warmest-first, stopping at the
//! first tier that satisfies a similarity threshold.
//!
//! ## Getting started
//!
//! ```no_run
//! use memstrata::{FabricConfig, MemoryManager, Payload};
//!
//! # async fn run() -> memstrata::Result<()> {
//! let config = FabricConfig::load("config/memstrata.yml")?;
//! let manager = MemoryManager::initialise(config).await?;
//!
//! let store = manager.memory_store();
//! let outcome = store
//!     .store("hot", Payload::Text("hello".into()), None, None)
//!     .await?;
//! println!("stored {} in {}", outcome.data_id, outcome.tier);
//! # Ok(())
//! # }
//! ```
//!
//! The manager is the single owner of shared resources; the dispatchers,
//! tiering, and prioritised search all borrow from it.

mod manager;

pub use manager::MemoryManager;

pub use memstrata_catalog::{Catalog, CatalogEntry, Registration};
pub use memstrata_core::{
    AnalyticsSettings, ConnectorConfig, DataFrame, FabricConfig, FabricError, IndexKind, Payload,
    Result, SchemaDescriptor, SchemaType, Tier,
};
pub use memstrata_glacier::{
    Connector, DataSource, DataSourceKind, DataSourceRegistry, GlacierMemory, GlacierObject,
    GlacierValue, LocalDataSource, SpatialInputKind,
};
pub use memstrata_index::{Encoder, HashingEncoder, SchemaHit, SchemaIndex};
pub use memstrata_query::{
    EnhancedHit, MemoryRetrieval, MemoryStore, MemoryTiering, PrioritizedSearch, QueryCapabilities,
    RetrievalResult, StoreOutcome, TierSearchOutcome,
};
pub use memstrata_tiers::{
    BatchImportReport, ColdFileInfo, ColdMemory, ColdRecord, HotBackend, HotMemory, MemoryBackend,
    RedHotHit, RedHotMemory, WarmMemory, WarmRecord, WarmStoreOutcome,
};
