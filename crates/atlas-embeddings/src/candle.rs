//! Candle-based embedding backend.
//!
//! Runs a BERT sentence encoder (all-MiniLM-L6-v2, 384 dimensions) on the
//! CPU with mean pooling over non-padding tokens.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use atlas_assets::{ModelCache, ResolvedModel};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

/// Embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length
pub const MAX_SEQ_LENGTH: usize = 256;

/// Files a BERT encoder needs from its resolved model directory.
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Local BERT sentence embedder.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    info: ModelInfo,
}

impl CandleEmbedder {
    /// Resolve `model_id` through the asset cache and load it.
    ///
    /// Downloads and verifies the model files on first use; later calls
    /// load straight from disk.
    pub async fn load(
        cache: &ModelCache,
        model_id: &str,
        ct: &CancellationToken,
    ) -> Result<Self, EmbeddingError> {
        let resolved = cache.resolve(model_id, ct).await.map_err(|e| {
            if e.is_cancelled() {
                EmbeddingError::Cancelled
            } else {
                e.into()
            }
        })?;
        let name = resolved.name.clone();
        let (config, tokenizer, weights) = (
            required_file(&resolved, CONFIG_FILE)?,
            required_file(&resolved, TOKENIZER_FILE)?,
            required_file(&resolved, WEIGHTS_FILE)?,
        );

        let task = tokio::task::spawn_blocking(move || {
            Self::load_from_paths(&name, &config, &tokenizer, &weights)
        });
        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(EmbeddingError::Cancelled),
            joined = task => joined.map_err(|e| EmbeddingError::Unavailable(e.to_string()))?,
        }
    }

    /// Load from explicit file paths.
    pub fn load_from_paths(
        name: &str,
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
    ) -> Result<Self, EmbeddingError> {
        info!(model = name, path = ?weights_path, "Loading embedding model");

        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(config_path)?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("Invalid config: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        // SAFETY: the weights file was digest-verified by the cache and is
        // not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DType::F32, &device)?
        };
        let model = BertModel::load(vb, &config)?;

        info!(model = name, dim = EMBEDDING_DIM, max_seq = MAX_SEQ_LENGTH, "Model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            info: ModelInfo {
                name: name.to_string(),
                dimension: EMBEDDING_DIM,
                max_sequence_length: MAX_SEQ_LENGTH,
            },
        })
    }

    /// Mean of token embeddings, ignoring padding.
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor, EmbeddingError> {
        let mask = attention_mask
            .unsqueeze(2)?
            .broadcast_as(embeddings.shape())?
            .to_dtype(DType::F32)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;

        Ok(sum.broadcast_div(&counts)?)
    }
}

fn required_file(resolved: &ResolvedModel, file_name: &str) -> Result<std::path::PathBuf, EmbeddingError> {
    resolved
        .file(file_name)
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            EmbeddingError::ModelNotFound(format!("{} has no {}", resolved.name, file_name))
        })
}

impl EmbeddingModel for CandleEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Unavailable("empty batch output".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(count = texts.len(), "Embedding batch");

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_SEQ_LENGTH);

        let mut ids = Vec::with_capacity(texts.len() * seq_len);
        let mut masks = Vec::with_capacity(texts.len() * seq_len);
        for encoding in &encodings {
            let take = encoding.get_ids().len().min(seq_len);
            ids.extend_from_slice(&encoding.get_ids()[..take]);
            masks.extend_from_slice(&encoding.get_attention_mask()[..take]);
            ids.extend(std::iter::repeat(0).take(seq_len - take));
            masks.extend(std::iter::repeat(0).take(seq_len - take));
        }

        let shape = (texts.len(), seq_len);
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(masks, shape, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled: Vec<Vec<f32>> = self.mean_pooling(&output, &attention_mask)?.to_vec2()?;

        Ok(pooled.into_iter().map(Embedding::new).collect())
    }
}
