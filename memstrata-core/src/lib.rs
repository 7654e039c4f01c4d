//! # Memstrata Core Types
//!
//! Foundation crate for the memstrata tiered memory fabric. Everything here is
//! shared vocabulary between the tier implementations, the catalog, the schema
//! index, and the dispatchers:
//!
//! - **Tiers**: the five-level storage ladder (red-hot → glacier) and its
//!   adjacency rules for promotion and demotion.
//! - **Errors**: the stable, tier-agnostic error taxonomy every component
//!   reports through.
//! - **Configuration**: the single YAML-shaped document that drives the whole
//!   fabric, with per-tier sections and path layout.
//! - **Payloads**: the sum type replacing duck-typed "anything JSON-like"
//!   inputs, plus the lightweight columnar [`DataFrame`].
//! - **Schemas**: compact descriptors of an artifact's shape used by the
//!   semantic schema index.
//! - **Vector kernels**: the exact L2 flat index shared by red-hot memory and
//!   the schema index.

mod config;
mod error;
mod frame;
mod payload;
mod schema;
mod tier;
mod vector;

pub use config::{
    AnalyticsSettings, ColdConfig, ConnectorConfig, DataConfig, FabricConfig, GlacierConfig,
    HotConfig, IndexKind, MemoryConfig, RedHotConfig, WarmConfig, COLD_PATH_ENV,
};
pub use error::{FabricError, Result};
pub use frame::DataFrame;
pub use payload::Payload;
pub use schema::{SchemaDescriptor, SchemaType};
pub use tier::Tier;
pub use vector::{l2_normalize, squared_l2, FlatIndex};
