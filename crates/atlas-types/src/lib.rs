//! # atlas-types
//!
//! Shared types for the Atlas model cache and geo search system.
//!
//! - Settings: layered configuration (defaults, config file, env vars)
//! - AtlasError: settings loading errors
//!
//! ## Usage
//!
//! ```rust
//! use atlas_types::Settings;
//!
//! let settings = Settings::default();
//! assert_eq!(settings.embedding.dimension, 384);
//! ```

pub mod config;
pub mod error;

pub use config::{DownloadSettings, EmbeddingSettings, RegistrySettings, Settings};
pub use error::AtlasError;
