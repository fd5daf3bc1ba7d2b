//! Embedding error types.

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Candle model error
    #[cfg(feature = "candle")]
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// A required model file is missing or unreadable
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Resolving model files through the asset cache failed
    #[error("Model assets unavailable: {0}")]
    Assets(#[from] atlas_assets::CacheError),

    /// Backend failed or panicked while embedding
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    /// Caller cancelled the request
    #[error("Embedding cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
