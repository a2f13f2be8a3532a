/// Configuration system for symbol-rag
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, IndexError};
use crate::paths::PlatformPaths;
use crate::tasks::walker::DEFAULT_MAX_FILE_SIZE;
use crate::vector_cache::{DEFAULT_GROWTH_FACTOR, DEFAULT_INITIAL_SLOTS, VectorCacheOptions};
use crate::vector_db::lance_client::DEFAULT_SEARCH_OVERSAMPLE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_INDEX_DIR: &str = "SYMBOL_RAG_INDEX_DIR";
pub const ENV_DB_PATH: &str = "SYMBOL_RAG_DB_PATH";
pub const ENV_DIMENSIONS: &str = "SYMBOL_RAG_DIMENSIONS";
pub const ENV_CACHE_DIR: &str = "SYMBOL_RAG_CACHE_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub vector_db: VectorDbConfig,

    #[serde(default)]
    pub vector_cache: VectorCacheConfig,
}

/// Symbol index files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Directory holding one `.idx` file per source file
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Larger files are skipped by the walker (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Paths containing any of these substrings are skipped
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorDbConfig {
    /// LanceDB data directory
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Embedding width
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Raw hits fetched per requested search result
    #[serde(default = "default_search_oversample")]
    pub search_oversample: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorCacheConfig {
    /// Where `vectors.bin` and `vectors_metadata.json` live
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_initial_slots")]
    pub initial_slots: usize,

    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
}

fn default_index_dir() -> PathBuf {
    PlatformPaths::default_index_dir()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_db_path() -> PathBuf {
    PlatformPaths::default_db_path()
}

fn default_dimensions() -> usize {
    384
}

fn default_search_oversample() -> usize {
    DEFAULT_SEARCH_OVERSAMPLE
}

fn default_cache_dir() -> PathBuf {
    PlatformPaths::default_vector_cache_dir()
}

fn default_initial_slots() -> usize {
    DEFAULT_INITIAL_SLOTS
}

fn default_growth_factor() -> f64 {
    DEFAULT_GROWTH_FACTOR
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            max_file_size: default_max_file_size(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            dimensions: default_dimensions(),
            search_oversample: default_search_oversample(),
        }
    }
}

impl Default for VectorCacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            initial_slots: default_initial_slots(),
            growth_factor: default_growth_factor(),
        }
    }
}

impl VectorCacheConfig {
    pub fn options(&self) -> VectorCacheOptions {
        VectorCacheOptions {
            initial_slots: self.initial_slots,
            growth_factor: self.growth_factor,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> IndexError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, or defaults when absent
    pub fn load_or_default() -> Result<Self, IndexError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.vector_db.dimensions == 0 {
            return Err(invalid("vector_db.dimensions", "must be greater than 0"));
        }

        if self.vector_db.search_oversample == 0 {
            return Err(invalid("vector_db.search_oversample", "must be greater than 0"));
        }

        if self.vector_cache.initial_slots == 0 {
            return Err(invalid("vector_cache.initial_slots", "must be greater than 0"));
        }

        // Also rejects NaN
        if !(self.vector_cache.growth_factor > 1.0) {
            return Err(invalid(
                "vector_cache.growth_factor",
                format!("must be greater than 1.0, got {}", self.vector_cache.growth_factor),
            ));
        }

        if self.index.max_file_size == 0 {
            return Err(invalid("index.max_file_size", "must be greater than 0"));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup. Unparsable numbers are ignored with a
    /// warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var(ENV_INDEX_DIR) {
            self.index.index_dir = PathBuf::from(dir);
        }

        if let Some(path) = var(ENV_DB_PATH) {
            self.vector_db.path = PathBuf::from(path);
        }

        if let Some(dims) = var(ENV_DIMENSIONS) {
            match dims.parse() {
                Ok(dims) => self.vector_db.dimensions = dims,
                Err(e) => tracing::warn!("Ignoring {}={:?}: {}", ENV_DIMENSIONS, dims, e),
            }
        }

        if let Some(dir) = var(ENV_CACHE_DIR) {
            self.vector_cache.dir = PathBuf::from(dir);
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, IndexError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
