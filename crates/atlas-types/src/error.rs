//! Error types shared across Atlas crates.

use thiserror::Error;

/// Error raised while loading settings.
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
