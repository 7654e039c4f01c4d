//! # Memstrata Glacier Memory
//!
//! The coldest tier: a uniform facade over *named connectors*. Two connector
//! families exist:
//!
//! 1. **Object stores** (S3-shaped, GCS-shaped, Azure-shaped, plus a local
//!    filesystem flavour used in tests), all speaking through the
//!    `object_store` crate. Structured payloads are JSON-encoded on the way
//!    in; retrieval tries JSON, then UTF-8, then raw bytes.
//! 2. **Read-only data sources** (satellite catalogues, map extracts, ...):
//!    the fabric fixes only their factory/lookup contract and delegates
//!    payload interpretation entirely to the source.
//!
//! The connector registry is built eagerly at memory-manager initialisation;
//! connections to remote endpoints are dialled lazily by the SDKs. Every
//! remote call runs under a configurable per-call deadline, and a timed-out
//! upload leaves no partial state because the key is deleted during
//! `cleanup()`.

mod connector;
mod facade;
mod sources;

pub use connector::{
    build_object_store, Connector, GlacierObject, GlacierValue, ObjectStoreConnector,
};
pub use facade::GlacierMemory;
pub use sources::{
    DataSource, DataSourceKind, DataSourceRegistry, LocalDataSource, SpatialInputKind,
};
