//! # Memstrata Query Layer
//!
//! The public entry points over the tier implementations:
//!
//! - [`MemoryStore`]: routes writes to the right tier, coerces payload
//!   shapes at the boundary, and guarantees a catalog entry exists before a
//!   write is reported successful.
//! - [`MemoryRetrieval`]: the cross-cutting read path, by tags for local
//!   tiers and by source for glacier data sources.
//! - [`MemoryTiering`]: adjacent-tier promotion and demotion with
//!   format-preserving conversions.
//! - [`PrioritizedSearch`]: walks tiers warmest-first and stops at the first
//!   tier whose schema-search hits clear a similarity threshold.

mod capabilities;
mod retrieval;
mod search;
mod store;
mod tiering;

pub use capabilities::{infer_query_capabilities, QueryCapabilities, QueryTemplate};
pub use retrieval::{MemoryRetrieval, RetrievalResult};
pub use search::{EnhancedHit, PrioritizedSearch, TierSearchOutcome};
pub use store::{MemoryStore, StoreOutcome};
pub use tiering::MemoryTiering;
