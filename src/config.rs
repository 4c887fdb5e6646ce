//! Settings for the store and the CLI.
//!
//! Built-in defaults are overlaid by `.semdex/settings.toml` and then by
//! `SEMDEX_*` environment variables, where `__` descends one table:
//! - `SEMDEX_ANN__M=32` sets `ann.m`
//! - `SEMDEX_STALENESS__DEFER_REBUILD=true` sets `staleness.defer_rebuild`
//! - `SEMDEX_LOGGING__LEVEL=debug` sets `logging.level`

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::collection::CollectionParams;
use crate::error::{StoreError, StoreResult};
use crate::query::AccuracyLevel;
use crate::storage::{AnnParams, DistanceSpace};
use crate::vector::{QuantizationBits, VectorDimension};

/// Directory holding the settings file, searched upwards from the cwd.
pub const CONFIG_DIR: &str = ".semdex";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "SEMDEX_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Settings schema revision
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory containing one subdirectory per collection
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Nearest ancestor of the cwd holding `.semdex`, filled in at load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Forces the `debug` log filter
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Parameters for newly created collections
    #[serde(default)]
    pub collection: CollectionConfig,

    /// ANN build and search parameters for newly created collections
    #[serde(default)]
    pub ann: AnnConfig,

    #[serde(default)]
    pub staleness: StalenessConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Columns of the random projection
    #[serde(default = "default_reduced_dim")]
    pub reduced_dim: usize,

    /// 1 or 2
    #[serde(default = "default_quantization_bits")]
    pub quantization_bits: u8,

    /// Hex characters per directory level
    #[serde(default = "default_depth_factor")]
    pub depth_factor: usize,

    /// Maximum directory levels
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Seed for the projection matrix and HNSW levels
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnConfig {
    #[serde(default = "default_m")]
    pub m: usize,

    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    #[serde(default = "default_ef_search")]
    pub ef_search: usize,

    #[serde(default)]
    pub space: DistanceSpace,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StalenessConfig {
    /// Mark the index stale at session end instead of updating it
    #[serde(default)]
    pub defer_rebuild: bool,

    /// Fraction of the corpus that may change before an update rebuilds
    #[serde(default = "default_rebuild_threshold")]
    pub rebuild_threshold: f64,

    /// 0 blocks indefinitely
    #[serde(default)]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,

    #[serde(default)]
    pub default_accuracy: AccuracyLevel,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("collections")
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_vector_dim() -> usize {
    crate::vector::DEFAULT_VECTOR_DIM
}
fn default_reduced_dim() -> usize {
    8
}
fn default_quantization_bits() -> u8 {
    2
}
fn default_depth_factor() -> usize {
    2
}
fn default_max_depth() -> usize {
    8
}
fn default_seed() -> u64 {
    0x5eed_cafe
}
fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}
fn default_rebuild_threshold() -> f64 {
    crate::index::DEFAULT_REBUILD_THRESHOLD
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_entries() -> usize {
    16
}
fn default_k() -> usize {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            workspace_root: None,
            debug: false,
            logging: LoggingConfig::default(),
            collection: CollectionConfig::default(),
            ann: AnnConfig::default(),
            staleness: StalenessConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            vector_dim: default_vector_dim(),
            reduced_dim: default_reduced_dim(),
            quantization_bits: default_quantization_bits(),
            depth_factor: default_depth_factor(),
            max_depth: default_max_depth(),
            seed: default_seed(),
        }
    }
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            space: DistanceSpace::Cosine,
        }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            defer_rebuild: false,
            rebuild_threshold: default_rebuild_threshold(),
            lock_timeout_ms: 0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            default_accuracy: AccuracyLevel::default(),
        }
    }
}

impl Settings {
    /// Loads the workspace settings file, or `./.semdex/settings.toml`
    /// when no workspace is found, under the env overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // `__` nests; single underscores belong to field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Walks up from the cwd to the first directory containing `.semdex`.
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Writes these settings as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `semdex init`: writes the defaults to `./.semdex/settings.toml`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);
        if !force && config_path.exists() {
            return Err(format!(
                "{} already exists, pass --force to replace it",
                config_path.display()
            )
            .into());
        }
        Settings::default().save(&config_path)?;
        Ok(config_path)
    }

    /// Data directory, resolved against the workspace root when relative
    pub fn resolved_data_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.data_dir.is_relative() => root.join(&self.data_dir),
            _ => self.data_dir.clone(),
        }
    }

    /// Lock wait limit, `None` meaning block indefinitely
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.staleness.lock_timeout_ms > 0)
            .then(|| Duration::from_millis(self.staleness.lock_timeout_ms))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Creation parameters for a new collection, validated
    pub fn collection_params(&self) -> StoreResult<CollectionParams> {
        let invalid = |reason: String| StoreError::InvalidParameters { reason };
        let vector_dim = VectorDimension::new(self.collection.vector_dim)
            .map_err(|e| invalid(e.to_string()))?;
        let quantization_bits = QuantizationBits::try_from(self.collection.quantization_bits)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(CollectionParams {
            vector_dim,
            reduced_dim: self.collection.reduced_dim,
            quantization_bits,
            depth_factor: self.collection.depth_factor,
            max_depth: self.collection.max_depth,
            seed: self.collection.seed,
            ann: AnnParams {
                m: self.ann.m,
                ef_construction: self.ann.ef_construction,
                ef_search: self.ann.ef_search,
                space: self.ann.space,
            },
        })
    }
}
