//! Model registry.
//!
//! Maps model names to download URLs and expected digests. An embedded
//! baseline ships with the binary and is always available offline. A
//! remote document may replace it after its detached signature verifies;
//! any refresh failure leaves the active registry untouched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::sanitize_model_id;
use crate::checksum::Checksum;
use crate::error::RegistryError;
use crate::signature::{decode_signature, RejectAllVerifier, SignatureVerifier};

/// Registry shipped inside the binary.
const EMBEDDED_REGISTRY: &str = include_str!("../registry/embedded_registry.json");

/// File name of the persisted last-good remote registry
pub const REMOTE_REGISTRY_FILE: &str = "remote_registry.json";

/// Suffix of detached signature documents
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// One downloadable artifact of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFile {
    pub file_name: String,
    pub url: String,
    pub checksum: String,
}

/// A registered model.
///
/// `url`/`checksum` describe the primary artifact; `files` lists the
/// additional artifacts of multi-file models (config, tokenizer, shards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub quantization: Option<String>,
    pub url: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ModelFile>,
}

impl RegistryEntry {
    /// Local file name of the primary artifact.
    ///
    /// Defaults to the last path segment of `url`, without query string.
    pub fn primary_file_name(&self) -> String {
        if let Some(name) = &self.file_name {
            return name.clone();
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }

    /// Every artifact, primary first.
    pub fn artifacts(&self) -> Vec<ModelFile> {
        let mut artifacts = Vec::with_capacity(1 + self.files.len());
        artifacts.push(ModelFile {
            file_name: self.primary_file_name(),
            url: self.url.clone(),
            checksum: self.checksum.clone(),
        });
        artifacts.extend(self.files.iter().cloned());
        artifacts
    }

    pub fn is_multi_file(&self) -> bool {
        !self.files.is_empty()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Parse("entry with empty name".to_string()));
        }
        let mut seen = HashSet::new();
        for artifact in self.artifacts() {
            let name = &artifact.file_name;
            if name.is_empty()
                || name == "."
                || name == ".."
                || name.contains(['/', '\\'])
            {
                return Err(RegistryError::Parse(format!(
                    "{}: invalid file name {:?}",
                    self.name, name
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(RegistryError::Parse(format!(
                    "{}: duplicate file {}",
                    self.name, name
                )));
            }
            artifact.checksum.parse::<Checksum>().map_err(|e| {
                RegistryError::Parse(format!("{}/{}: {}", self.name, name, e))
            })?;
        }
        Ok(())
    }
}

/// A registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub registry_url: String,
    pub last_updated: DateTime<Utc>,
    #[serde(alias = "models")]
    pub entries: Vec<RegistryEntry>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Registry {
    /// Parse and validate a registry document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RegistryError> {
        let registry: Registry = serde_json::from_slice(bytes)?;
        registry.validate()?;
        Ok(registry)
    }

    /// The baseline compiled into the binary.
    pub fn embedded() -> Result<Self, RegistryError> {
        Self::from_slice(EMBEDDED_REGISTRY.as_bytes())
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut names = HashSet::new();
        let mut dirs: HashMap<String, &str> = HashMap::new();
        for entry in &self.entries {
            entry.validate()?;
            if !names.insert(normalize_name(&entry.name)) {
                return Err(RegistryError::DuplicateEntry(entry.name.clone()));
            }
            // Distinct names must not share a cache directory.
            let dir = sanitize_model_id(&entry.name).to_lowercase();
            if let Some(first) = dirs.insert(dir, &entry.name) {
                return Err(RegistryError::PathCollision {
                    first: first.to_string(),
                    second: entry.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        let wanted = normalize_name(name);
        self.entries
            .iter()
            .find(|entry| normalize_name(&entry.name) == wanted)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

/// Where the active registry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
    Embedded,
    /// Last-good remote copy loaded from disk at startup
    Persisted,
    Remote,
}

impl RegistrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrySource::Embedded => "embedded",
            RegistrySource::Persisted => "persisted",
            RegistrySource::Remote => "remote",
        }
    }
}

struct ActiveRegistry {
    registry: Arc<Registry>,
    source: RegistrySource,
}

/// Embedded baseline plus an optional verified remote overlay.
pub struct ModelRegistry {
    baseline: Arc<Registry>,
    active: RwLock<ActiveRegistry>,
    verifier: Arc<dyn SignatureVerifier>,
    remote_url: String,
    persist_dir: Option<PathBuf>,
}

impl ModelRegistry {
    /// Load the embedded baseline.
    ///
    /// A failure here means the binary was built with a broken registry
    /// and should be treated as fatal by the caller.
    pub fn load() -> Result<Self, RegistryError> {
        Ok(Self::with_baseline(Registry::embedded()?))
    }

    /// Use `baseline` in place of the embedded registry.
    pub fn with_baseline(baseline: Registry) -> Self {
        let baseline = Arc::new(baseline);
        Self {
            remote_url: baseline.registry_url.clone(),
            active: RwLock::new(ActiveRegistry {
                registry: baseline.clone(),
                source: RegistrySource::Embedded,
            }),
            baseline,
            verifier: Arc::new(RejectAllVerifier),
            persist_dir: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Fetch remote documents from `url` instead of the baseline's registryUrl.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    /// Persist accepted remote documents under `dir`, and activate a
    /// previously persisted one if its signature still verifies.
    ///
    /// Call after [`Self::with_verifier`].
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match self.load_persisted(&dir) {
            Ok(Some(registry)) => {
                info!(
                    path = ?dir,
                    last_updated = %registry.last_updated,
                    "Using persisted remote registry"
                );
                self.activate(registry, RegistrySource::Persisted);
            }
            Ok(None) => {}
            Err(e) => warn!(path = ?dir, error = %e, "Ignoring persisted registry"),
        }
        self.persist_dir = Some(dir);
        self
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Snapshot of the active registry.
    pub fn active(&self) -> Arc<Registry> {
        self.read_active().registry.clone()
    }

    pub fn source(&self) -> RegistrySource {
        self.read_active().source
    }

    /// Case-insensitive lookup against the active registry.
    pub fn lookup(&self, name: &str) -> Result<RegistryEntry, RegistryError> {
        self.active()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Try to replace the active registry with the signed remote document.
    ///
    /// Never fails: on any fetch, parse, signature or acceptance failure
    /// the active registry stays in effect and `false` is returned.
    pub async fn refresh(&self, client: &Client, ct: &CancellationToken) -> bool {
        match self.try_refresh(client, ct).await {
            Ok(registry) => {
                info!(
                    url = %self.remote_url,
                    entries = registry.entries.len(),
                    last_updated = %registry.last_updated,
                    "Registry refreshed"
                );
                self.activate(registry, RegistrySource::Remote);
                true
            }
            Err(RegistryError::Cancelled) => {
                debug!("Registry refresh cancelled");
                false
            }
            Err(e) => {
                warn!(
                    url = %self.remote_url,
                    error = %e,
                    source = self.source().as_str(),
                    "Registry refresh failed, keeping active registry"
                );
                false
            }
        }
    }

    async fn try_refresh(
        &self,
        client: &Client,
        ct: &CancellationToken,
    ) -> Result<Registry, RegistryError> {
        let signature_url = format!("{}{}", self.remote_url, SIGNATURE_SUFFIX);
        let document = fetch_bytes(client, &self.remote_url, ct).await?;
        let signature_text = fetch_bytes(client, &signature_url, ct).await?;

        let registry = self.accept(&document, &signature_text)?;

        if let Some(dir) = &self.persist_dir {
            if let Err(e) = persist(dir, &document, &signature_text).await {
                warn!(path = ?dir, error = %e, "Failed to persist remote registry");
            }
        }

        Ok(registry)
    }

    /// Verify and validate a candidate document against the baseline and
    /// the active registry.
    fn accept(&self, document: &[u8], signature_text: &[u8]) -> Result<Registry, RegistryError> {
        let signature = decode_signature(signature_text)
            .ok_or_else(|| RegistryError::Signature("signature is not valid hex".to_string()))?;
        if !self.verifier.verify(document, &signature) {
            return Err(RegistryError::Signature(
                "signature does not match document".to_string(),
            ));
        }

        let candidate = Registry::from_slice(document)?;

        // Append-only: the overlay may add models but never drop baseline ones.
        if let Some(missing) = self.baseline.names().find(|name| !candidate.contains(name)) {
            return Err(RegistryError::MissingBaselineEntry(missing.to_string()));
        }

        let active = self.active();
        if candidate.last_updated < active.last_updated {
            return Err(RegistryError::Stale {
                candidate: candidate.last_updated.to_rfc3339(),
                active: active.last_updated.to_rfc3339(),
            });
        }

        Ok(candidate)
    }

    fn load_persisted(&self, dir: &Path) -> Result<Option<Registry>, RegistryError> {
        let document_path = dir.join(REMOTE_REGISTRY_FILE);
        let signature_path = dir.join(format!("{}{}", REMOTE_REGISTRY_FILE, SIGNATURE_SUFFIX));
        if !document_path.exists() {
            return Ok(None);
        }
        let document = std::fs::read(&document_path)?;
        let signature = std::fs::read(&signature_path)?;
        self.accept(&document, &signature).map(Some)
    }

    fn activate(&self, registry: Registry, source: RegistrySource) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = ActiveRegistry {
            registry: Arc::new(registry),
            source,
        };
    }

    fn read_active(&self) -> std::sync::RwLockReadGuard<'_, ActiveRegistry> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fetch_bytes(
    client: &Client,
    url: &str,
    ct: &CancellationToken,
) -> Result<Vec<u8>, RegistryError> {
    let request = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Fetch(format!("HTTP {} for {}", status, url)));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Fetch(e.to_string()))?;
        Ok::<_, RegistryError>(body.to_vec())
    };

    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(RegistryError::Cancelled),
        result = request => result,
    }
}

async fn persist(dir: &Path, document: &[u8], signature: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let document_path = dir.join(REMOTE_REGISTRY_FILE);
    let signature_path = dir.join(format!("{}{}", REMOTE_REGISTRY_FILE, SIGNATURE_SUFFIX));

    // The document is renamed into place last; a torn write fails verification at load.
    let staged = dir.join(format!("{}.tmp", REMOTE_REGISTRY_FILE));
    tokio::fs::write(&staged, document).await?;
    tokio::fs::write(&signature_path, signature).await?;
    tokio::fs::rename(&staged, &document_path).await?;
    debug!(path = ?document_path, "Persisted remote registry");
    Ok(())
}
