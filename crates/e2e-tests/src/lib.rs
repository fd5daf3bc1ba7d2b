//! End-to-end test infrastructure for atlas.
//!
//! Provides a shared TestHarness (temp directories plus a mock model
//! host), registry document builders, a fixed signing key, and a small
//! keyword embedder that is initialized from a cache-resolved file, the
//! same way a real backend consumes its weights.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use atlas_assets::{Downloader, ModelCache, ModelRegistry, Registry};
use atlas_embeddings::{Embedding, EmbeddingError, EmbeddingModel, ModelInfo};
use atlas_types::DownloadSettings;

/// Keywords the test embedding model knows about, one dimension each.
pub const VOCAB: &[&str] = &[
    "coffee", "espresso", "pasta", "pizza", "museum", "gallery", "surf", "beach",
];

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Serves model files and registry documents
    pub server: MockServer,
    /// Root of the model asset cache
    pub cache_root: PathBuf,
    /// RocksDB directory for search records
    pub db_path: PathBuf,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let cache_root = temp_dir.path().join("models");
        let db_path = temp_dir.path().join("search-db");
        std::fs::create_dir_all(&db_path).expect("Failed to create db dir");

        Self {
            _temp_dir: temp_dir,
            server: MockServer::start().await,
            cache_root,
            db_path,
        }
    }

    /// Absolute URL of `route` on the mock host.
    pub fn url(&self, route: &str) -> String {
        format!("{}{}", self.server.uri(), route)
    }

    /// Serve `body` at `route` and return its URL.
    pub async fn serve(&self, route: &str, body: &[u8]) -> String {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&self.server)
            .await;
        self.url(route)
    }

    /// Number of requests the mock host has seen for `route`.
    pub async fn hits(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }

    /// Model cache rooted in the harness temp dir.
    pub fn cache(&self, registry: Arc<ModelRegistry>) -> ModelCache {
        let downloader = Downloader::from_settings(&DownloadSettings::default())
            .expect("Failed to build downloader");
        ModelCache::new(&self.cache_root, registry, downloader)
    }
}

/// `sha256:<hex>` of `bytes`.
pub fn sha256_checksum(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// A single-file registry entry.
pub fn entry(name: &str, url: &str, checksum: &str) -> Value {
    json!({ "name": name, "version": "1", "url": url, "checksum": checksum })
}

/// Serialized registry document.
pub fn registry_doc(registry_url: &str, last_updated: &str, entries: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({
        "registryUrl": registry_url,
        "lastUpdated": last_updated,
        "entries": entries,
    }))
    .expect("Failed to serialize registry")
}

/// Parse a registry document built with [`registry_doc`].
pub fn registry(doc: &[u8]) -> Registry {
    Registry::from_slice(doc).expect("Invalid registry document")
}

/// Deterministic publisher key for signed registry tests.
pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn public_key_hex() -> String {
    hex::encode(signing_key().verifying_key().to_bytes())
}

/// Hex-encoded detached signature over `doc`.
pub fn sign_hex(doc: &[u8]) -> String {
    hex::encode(signing_key().sign(doc).to_bytes())
}

/// Vocabulary file as the test model host serves it.
pub fn vocab_file() -> Vec<u8> {
    serde_json::to_vec(VOCAB).expect("Failed to serialize vocab")
}

/// Counts vocabulary keywords in the text; one dimension per keyword.
pub struct KeywordEmbedder {
    info: ModelInfo,
    vocab: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(name: &str, vocab: Vec<String>) -> Self {
        Self {
            info: ModelInfo {
                name: name.to_string(),
                dimension: vocab.len(),
                max_sequence_length: 512,
            },
            vocab,
        }
    }

    /// Load the vocabulary from a resolved model file (a JSON string array).
    pub fn from_vocab_file(name: &str, path: &Path) -> Result<Self, EmbeddingError> {
        let bytes = std::fs::read(path)?;
        let vocab: Vec<String> = serde_json::from_slice(&bytes)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("bad vocab: {}", e)))?;
        Ok(Self::new(name, vocab))
    }
}

impl EmbeddingModel for KeywordEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let values = self
            .vocab
            .iter()
            .map(|word| tokens.iter().filter(|t| **t == word.as_str()).count() as f32)
            .collect();
        Ok(Embedding::raw(values))
    }
}
