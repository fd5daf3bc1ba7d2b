//! Configuration loading for Atlas.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/atlas/config.toml.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AtlasError;

/// Remote registry refresh settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Overrides the registryUrl carried by the embedded registry.
    #[serde(default)]
    pub url: Option<String>,

    /// Hex-encoded Ed25519 public key for remote registry signatures.
    /// Without a key every remote document is rejected.
    #[serde(default)]
    pub public_key: Option<String>,

    /// Attempt a refresh when the process starts.
    #[serde(default)]
    pub refresh_on_start: bool,
}

/// HTTP download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Value of the User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Overall request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Minimum wall-clock gap between progress updates
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Write buffer size for streamed downloads
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_user_agent() -> String {
    format!("atlas/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_chunk_size() -> usize {
    8192
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl DownloadSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }
        if self.progress_interval_ms == 0 {
            return Err("progress_interval_ms must be > 0".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Embedding and search index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Registry identifier of the embedding model
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension produced by the model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum accepted item text length, in characters
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

impl EmbeddingSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("embedding model must not be empty".to_string());
        }
        if self.dimension == 0 {
            return Err("embedding dimension must be > 0".to_string());
        }
        if self.max_text_len == 0 {
            return Err("max_text_len must be > 0".to_string());
        }
        Ok(())
    }
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_max_text_len() -> usize {
    500
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_dimension(),
            max_text_len: default_max_text_len(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory of the model asset cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Path to the RocksDB search record store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub download: DownloadSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

fn default_cache_dir() -> String {
    ProjectDirs::from("", "", "atlas")
        .map(|p| p.cache_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "atlas")
        .map(|p| p.data_local_dir().join("search-db"))
        .unwrap_or_else(|| PathBuf::from("./search-db"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            log_level: default_log_level(),
            registry: RegistrySettings::default(),
            download: DownloadSettings::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/atlas/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (ATLAS_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, AtlasError> {
        let config_dir = ProjectDirs::from("", "", "atlas")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("cache_dir", default_cache_dir())
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("db_path", default_db_path())
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("download.user_agent", default_user_agent())
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("download.timeout_secs", default_timeout_secs() as i64)
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("embedding.model", default_embedding_model())
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .set_default("embedding.dimension", default_dimension() as i64)
            .map_err(|e| AtlasError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // ATLAS_LOG_LEVEL, ATLAS_DOWNLOAD__TIMEOUT_SECS, ATLAS_REGISTRY__PUBLIC_KEY, ...
        builder = builder.add_source(
            Environment::with_prefix("ATLAS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AtlasError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| AtlasError::Config(e.to_string()))?;

        settings.download.validate().map_err(AtlasError::Config)?;
        settings.embedding.validate().map_err(AtlasError::Config)?;
        Ok(settings)
    }

    /// Cache root with a leading `~/` expanded.
    pub fn expanded_cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }

    /// Database path with a leading `~/` expanded.
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
