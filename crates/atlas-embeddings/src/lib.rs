//! # atlas-embeddings
//!
//! The embedding capability: `embed(text) -> vector` of a fixed dimension.
//!
//! Search code depends only on [`EmbeddingModel`]. Which backend sits
//! behind it is chosen at build time; with the default `candle` feature,
//! [`CandleEmbedder`] runs all-MiniLM-L6-v2 locally on files resolved
//! through the verified asset cache.

#[cfg(feature = "candle")]
pub mod candle;
pub mod error;
pub mod model;

#[cfg(feature = "candle")]
pub use crate::candle::CandleEmbedder;
pub use error::EmbeddingError;
pub use model::{embed_cancellable, Embedding, EmbeddingModel, ModelInfo};
