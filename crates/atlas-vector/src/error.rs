//! Vector index error types.

use atlas_embeddings::EmbeddingError;
use thiserror::Error;

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// No embedding backend is wired up, or it failed
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Text or coordinates rejected before embedding
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Stored row does not decode
    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: u64, reason: String },

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// RocksDB error
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),
}

impl From<EmbeddingError> for VectorError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Cancelled => VectorError::Cancelled,
            EmbeddingError::DimensionMismatch { expected, actual } => {
                VectorError::DimensionMismatch { expected, actual }
            }
            EmbeddingError::InvalidInput(msg) => VectorError::InvalidInput(msg),
            other => VectorError::EmbeddingUnavailable(other.to_string()),
        }
    }
}
