//! Embedding model trait and types.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::EmbeddingError;

/// A fixed-length float32 vector produced by an [`EmbeddingModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Create an embedding scaled to unit length.
    ///
    /// A zero vector is kept as is.
    pub fn new(values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        if norm > 0.0 {
            Self {
                values: values.into_iter().map(|x| x / norm).collect(),
            }
        } else {
            Self { values }
        }
    }

    /// Wrap a vector without rescaling it.
    pub fn raw(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Fail unless the vector has `expected` components.
    pub fn check_dimension(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.values.len(),
            })
        }
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Registry name of the model (e.g., "all-minilm-l6-v2")
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
    /// Maximum sequence length in tokens
    pub max_sequence_length: usize,
}

/// Text to vector capability.
///
/// Implementations are synchronous and CPU-bound; async callers go
/// through [`embed_cancellable`].
pub trait EmbeddingModel: Send + Sync {
    fn info(&self) -> &ModelInfo;

    /// Embed a single text into a vector of `info().dimension` components.
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Embed several texts. Defaults to one `embed` call per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Run `model.embed(text)` on the blocking pool, abandoning it on cancellation.
///
/// The result is checked against the model's advertised dimension. A
/// cancelled call returns immediately; the blocking work runs to completion
/// in the background and its result is dropped.
pub async fn embed_cancellable(
    model: Arc<dyn EmbeddingModel>,
    text: String,
    ct: &CancellationToken,
) -> Result<Embedding, EmbeddingError> {
    if ct.is_cancelled() {
        return Err(EmbeddingError::Cancelled);
    }

    let expected = model.info().dimension;
    let task = tokio::task::spawn_blocking(move || model.embed(&text));

    let embedding = tokio::select! {
        biased;
        _ = ct.cancelled() => return Err(EmbeddingError::Cancelled),
        joined = task => joined.map_err(|e| EmbeddingError::Unavailable(e.to_string()))??,
    };

    embedding.check_dimension(expected)?;
    Ok(embedding)
}
