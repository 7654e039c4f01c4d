//! Stable error taxonomy shared by every fabric component.
//!
//! Tier implementations never swallow backend failures: they wrap them with
//! context and propagate upward. Dispatchers translate whatever a tier
//! surfaces into this closed set so callers can match on error kind without
//! knowing which backend sat underneath.

use std::time::Duration;

use crate::tier::Tier;

/// Result alias used across the fabric.
pub type Result<T> = std::result::Result<T, FabricError>;

/// Tier-agnostic error kinds.
///
/// The set is intentionally closed: a new failure mode in a backend maps onto
/// one of these, most often [`FabricError::Backend`] with context.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Missing or ill-typed configuration. Fatal at construction time.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A tier name outside the closed five-tier set.
    #[error("unknown memory tier: {0}")]
    TierUnknown(String),

    /// A glacier connector name that is not registered.
    #[error("unknown glacier connector: {0}")]
    ConnectorUnknown(String),

    /// Red-hot vector dimension or dtype did not match the configured index.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Key or data id absent from its tier. Not fatal for best-effort reads.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external-store call exceeded its deadline. No partial state remains.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying store returned an error; catalog state was not updated.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Promotion requested to the same tier or a colder one.
    #[error("invalid promotion from {from} to {target}")]
    InvalidPromotion { from: Tier, target: Tier },

    /// Hot → red-hot promotion attempted on a value that is not a vector.
    #[error("value under key {0} is not vectorisable")]
    NotVectorisable(String),

    /// Spatial input type unknown to the addressed data source.
    #[error("unsupported spatial input type: {0}")]
    UnsupportedSpatialInput(String),

    /// Data source name unknown to the glacier retrieval path.
    #[error("unknown data source: {0}")]
    UnknownSource(String),
}

impl FabricError {
    /// Wrap any backend failure with its display form.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        FabricError::Backend(err.to_string())
    }

    /// Wrap a backend failure with an operation label for context.
    pub fn backend_ctx(context: &str, err: impl std::fmt::Display) -> Self {
        FabricError::Backend(format!("{context}: {err}"))
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(err: serde_json::Error) -> Self {
        FabricError::backend_ctx("json", err)
    }
}

impl From<std::io::Error> for FabricError {
    fn from(err: std::io::Error) -> Self {
        FabricError::backend_ctx("io", err)
    }
}
