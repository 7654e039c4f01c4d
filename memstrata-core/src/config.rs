//! Fabric configuration.
//!
//! The whole fabric is driven by a single YAML-shaped document with one
//! section per tier plus shared data paths:
//!
//! ```yaml
//! memory:
//!   base_path: ./data/memory
//!   red_hot: { path: red_hot, index_type: Flat, vector_dim: 384, max_size: 10000 }
//!   hot:     { path: hot, external_cache_url: "redis://127.0.0.1:6379" }
//!   warm:    { path: warm, duckdb: { memory_limit: "4GB", threads: 4 } }
//!   cold:    { path: cold, duckdb: { memory_limit: "4GB", threads: 4 } }
//!   glacier: { path: glacier, connectors: { obj: { type: s3, bucket: b } } }
//! data:
//!   storage: ./data/storage
//!   cache:   ./data/cache
//!   models:  ./data/models
//! ```
//!
//! Unknown top-level keys are ignored so documents can carry host-application
//! sections. Unknown keys *inside* a known tier section are a configuration
//! error. Configuration is read once at construction; changing it requires a
//! full re-initialisation of the memory manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::tier::Tier;

/// Environment variable consulted for the cold tier directory when the
/// configuration omits `memory.cold.path`. The configuration key always wins.
pub const COLD_PATH_ENV: &str = "MEMSTRATA_COLD_PATH";

/// Root configuration document for the fabric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Per-tier memory settings and the base directory layout.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Shared data directories (raw storage, cache, model artifacts).
    #[serde(default)]
    pub data: DataConfig,
}

/// The `memory:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Root directory under which every tier keeps its local state.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    #[serde(default)]
    pub red_hot: RedHotConfig,

    #[serde(default)]
    pub hot: HotConfig,

    #[serde(default)]
    pub warm: WarmConfig,

    #[serde(default)]
    pub cold: ColdConfig,

    #[serde(default)]
    pub glacier: GlacierConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            red_hot: RedHotConfig::default(),
            hot: HotConfig::default(),
            warm: WarmConfig::default(),
            cold: ColdConfig::default(),
            glacier: GlacierConfig::default(),
        }
    }
}

/// Vector index flavour for red-hot memory. Closed set; anything else is a
/// construction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Exact exhaustive L2 search.
    Flat,
    /// Inverted-file coarse quantizer over L2.
    #[serde(rename = "IVF")]
    Ivf,
}

impl FromStr for IndexKind {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Flat" => Ok(IndexKind::Flat),
            "IVF" => Ok(IndexKind::Ivf),
            other => Err(FabricError::ConfigInvalid(format!(
                "invalid index type {other:?}, expected one of Flat, IVF"
            ))),
        }
    }
}

/// Red-hot tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedHotConfig {
    #[serde(default = "default_red_hot_dir")]
    pub path: String,

    #[serde(default = "default_index_kind")]
    pub index_type: IndexKind,

    /// Dimension every stored vector must match.
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Accepted for compatibility with GPU-backed deployments; the in-process
    /// index is CPU-only and logs a warning when set.
    #[serde(default)]
    pub use_gpu: bool,

    /// Live-entry cap; storing beyond it evicts the oldest live vector.
    #[serde(default = "default_red_hot_max_size")]
    pub max_size: usize,

    /// Flush index + metadata to disk every this many inserts.
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
}

impl Default for RedHotConfig {
    fn default() -> Self {
        Self {
            path: default_red_hot_dir(),
            index_type: default_index_kind(),
            vector_dim: default_vector_dim(),
            use_gpu: false,
            max_size: default_red_hot_max_size(),
            save_interval: default_save_interval(),
        }
    }
}

/// Hot tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotConfig {
    #[serde(default = "default_hot_dir")]
    pub path: String,

    /// External cache endpoint, e.g. `redis://127.0.0.1:6379`. When absent or
    /// unreachable within the probe timeout, hot memory runs on the
    /// in-process fallback with identical semantics.
    #[serde(default)]
    pub external_cache_url: Option<String>,

    /// Logical database number on the external cache.
    #[serde(default)]
    pub external_cache_db: Option<i64>,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            path: default_hot_dir(),
            external_cache_url: None,
            external_cache_db: None,
        }
    }
}

/// Tuning knobs for the embedded analytical engine backing warm and cold
/// storage. The section keeps its historical `duckdb` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsSettings {
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Whether externally-registered files may be opened at all.
    #[serde(default = "default_true")]
    pub enable_external_access: bool,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            threads: default_threads(),
            enable_external_access: true,
        }
    }
}

impl AnalyticsSettings {
    /// Parse `memory_limit` ("4GB", "512 MB", ...) into bytes. Unparseable
    /// limits fall back to 4 GiB.
    pub fn memory_limit_bytes(&self) -> u64 {
        let text = self.memory_limit.trim().to_ascii_uppercase();
        let split = text
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(text.len());
        let (num, unit) = text.split_at(split);
        let value: f64 = match num.trim().parse() {
            Ok(v) => v,
            Err(_) => return 4 * 1024 * 1024 * 1024,
        };
        let multiplier: u64 = match unit.trim() {
            "" | "B" => 1,
            "KB" | "KIB" => 1024,
            "MB" | "MIB" => 1024 * 1024,
            "GB" | "GIB" => 1024 * 1024 * 1024,
            "TB" | "TIB" => 1024u64.pow(4),
            _ => return 4 * 1024 * 1024 * 1024,
        };
        (value * multiplier as f64) as u64
    }
}

/// Warm tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmConfig {
    #[serde(default = "default_warm_dir")]
    pub path: String,

    #[serde(default)]
    pub duckdb: AnalyticsSettings,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            path: default_warm_dir(),
            duckdb: AnalyticsSettings::default(),
        }
    }
}

/// Cold tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColdConfig {
    /// Directory for the analytical store, relative to `base_path`. When
    /// omitted, the `MEMSTRATA_COLD_PATH` environment variable is consulted
    /// before falling back to `<base_path>/cold`.
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum stored bytes; 0 means unlimited.
    #[serde(default)]
    pub max_size: u64,

    #[serde(default)]
    pub duckdb: AnalyticsSettings,

    /// Whether `clear()` also deletes externally-registered source files.
    #[serde(default)]
    pub delete_external_on_clear: bool,
}

impl Default for ColdConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size: 0,
            duckdb: AnalyticsSettings::default(),
            delete_external_on_clear: false,
        }
    }
}

/// One named glacier connector.
///
/// The `type` key selects the provider family; the remaining keys are the
/// provider credentials and addressing. Credentials omitted here are resolved
/// from the provider SDK's usual environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// GCS service account key file.
    #[serde(default)]
    pub service_account_path: Option<String>,

    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub container: Option<String>,

    /// Root directory for the local filesystem connector.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Glacier tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlacierConfig {
    #[serde(default = "default_glacier_dir")]
    pub path: String,

    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,

    /// Connector used when a call does not name one explicitly.
    #[serde(default)]
    pub default_connector: Option<String>,

    /// Per-call deadline for remote operations, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GlacierConfig {
    fn default() -> Self {
        Self {
            path: default_glacier_dir(),
            connectors: HashMap::new(),
            default_connector: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// The `data:` section of shared directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    #[serde(default = "default_storage_path")]
    pub storage: PathBuf,

    #[serde(default = "default_cache_path")]
    pub cache: PathBuf,

    #[serde(default = "default_models_path")]
    pub models: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            storage: default_storage_path(),
            cache: default_cache_path(),
            models: default_models_path(),
        }
    }
}

impl FabricConfig {
    /// Load and validate a configuration document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref().to_path_buf()))
            .build()
            .map_err(|e| FabricError::ConfigInvalid(e.to_string()))?;

        let cfg: FabricConfig = settings
            .try_deserialize()
            .map_err(|e| FabricError::ConfigInvalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// A configuration with every path rooted under `root`. Used by tests and
    /// embedded deployments that do not ship a config file.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut cfg = FabricConfig::default();
        cfg.memory.base_path = root.join("memory");
        cfg.data.storage = root.join("storage");
        cfg.data.cache = root.join("cache");
        cfg.data.models = root.join("models");
        cfg
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.memory.red_hot.vector_dim == 0 {
            return Err(FabricError::ConfigInvalid(
                "memory.red_hot.vector_dim must be positive".into(),
            ));
        }
        if self.memory.red_hot.max_size == 0 {
            return Err(FabricError::ConfigInvalid(
                "memory.red_hot.max_size must be positive".into(),
            ));
        }
        if let Some(default) = &self.memory.glacier.default_connector {
            if !self.memory.glacier.connectors.contains_key(default) {
                return Err(FabricError::ConfigInvalid(format!(
                    "memory.glacier.default_connector {default:?} is not a configured connector"
                )));
            }
        }
        Ok(())
    }

    /// Directory holding a tier's local state.
    ///
    /// Cold resolution follows a fixed precedence: the configuration key,
    /// then [`COLD_PATH_ENV`], then `<base_path>/cold`.
    pub fn tier_path(&self, tier: Tier) -> PathBuf {
        let base = &self.memory.base_path;
        match tier {
            Tier::RedHot => base.join(&self.memory.red_hot.path),
            Tier::Hot => base.join(&self.memory.hot.path),
            Tier::Warm => base.join(&self.memory.warm.path),
            Tier::Cold => match &self.memory.cold.path {
                Some(p) => base.join(p),
                None => match std::env::var(COLD_PATH_ENV) {
                    Ok(p) if !p.is_empty() => PathBuf::from(p),
                    _ => base.join("cold"),
                },
            },
            Tier::Glacier => base.join(&self.memory.glacier.path),
        }
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./data/memory")
}

fn default_red_hot_dir() -> String {
    "red_hot".into()
}

fn default_hot_dir() -> String {
    "hot".into()
}

fn default_warm_dir() -> String {
    "warm".into()
}

fn default_glacier_dir() -> String {
    "glacier".into()
}

fn default_index_kind() -> IndexKind {
    IndexKind::Flat
}

fn default_vector_dim() -> usize {
    384
}

fn default_red_hot_max_size() -> usize {
    10_000
}

fn default_save_interval() -> usize {
    100
}

fn default_memory_limit() -> String {
    "4GB".into()
}

fn default_threads() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/storage")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_models_path() -> PathBuf {
    PathBuf::from("./data/models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        FabricConfig::default().validate().unwrap();
    }

    #[test]
    fn memory_limit_parsing() {
        let mut settings = AnalyticsSettings::default();
        settings.memory_limit = "512MB".into();
        assert_eq!(settings.memory_limit_bytes(), 512 * 1024 * 1024);
        settings.memory_limit = "2 GiB".into();
        assert_eq!(settings.memory_limit_bytes(), 2 * 1024 * 1024 * 1024);
        settings.memory_limit = "garbage".into();
        assert_eq!(settings.memory_limit_bytes(), 4 * 1024 * 1024 * 1024);
    }

    #[test]
    fn unknown_tier_key_is_rejected() {
        let yaml = r#"
memory:
  red_hot:
    path: red_hot
    turbo: true
"#;
        let parsed: std::result::Result<FabricConfig, _> = serde_yaml_like(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_top_level_key_is_ignored() {
        let yaml = r#"
memory:
  base_path: ./mem
application:
  name: host-app
"#;
        let parsed: FabricConfig = serde_yaml_like(yaml).unwrap();
        assert_eq!(parsed.memory.base_path, PathBuf::from("./mem"));
    }

    #[test]
    fn default_connector_must_exist() {
        let mut cfg = FabricConfig::default();
        cfg.memory.glacier.default_connector = Some("missing".into());
        assert!(matches!(
            cfg.validate(),
            Err(FabricError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn invalid_index_type_is_rejected() {
        assert!("HNSW".parse::<IndexKind>().is_err());
        assert_eq!("IVF".parse::<IndexKind>().unwrap(), IndexKind::Ivf);
    }

    /// Route YAML through the config crate the same way `load` does.
    fn serde_yaml_like<T: serde::de::DeserializeOwned>(
        yaml: &str,
    ) -> std::result::Result<T, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }
}
