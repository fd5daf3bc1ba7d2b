//! Model asset cache.
//!
//! Resolves a model identifier to verified files under
//! `<root>/<sanitized-id>/`. Downloads go to a `.part` staging file that is
//! renamed into place only after its digest matches the registry, so a
//! resolved path never points at unverified bytes. If any artifact of a
//! model fails, the whole model directory is removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::{self, Checksum};
use crate::download::Downloader;
use crate::error::{CacheError, DownloadError};
use crate::progress::DownloadProgress;
use crate::registry::{ModelFile, ModelRegistry, RegistryEntry};

/// Suffix of in-flight download files
const STAGING_SUFFIX: &str = ".part";

/// Map a model identifier to a single inert path component.
///
/// Path separators become `_`; names made only of dots are prefixed so
/// they cannot address the parent directory.
pub fn sanitize_model_id(model_id: &str) -> String {
    let sanitized: String = model_id
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        format!("_{}", sanitized)
    } else {
        sanitized
    }
}

/// Verified local files of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Registry name of the model
    pub name: String,
    /// Directory holding every artifact
    pub dir: PathBuf,
    /// Artifact paths, primary first
    pub files: Vec<PathBuf>,
}

impl ResolvedModel {
    /// Path of the primary artifact.
    pub fn path(&self) -> &Path {
        self.files.first().map(PathBuf::as_path).unwrap_or(&self.dir)
    }

    /// Path of the artifact named `file_name`, if the model has one.
    pub fn file(&self, file_name: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == file_name))
            .map(PathBuf::as_path)
    }
}

/// Idempotent, per-model serialized resolver for registry models.
pub struct ModelCache {
    root: PathBuf,
    registry: Arc<ModelRegistry>,
    downloader: Downloader,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ModelCache {
    /// Create a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>, registry: Arc<ModelRegistry>, downloader: Downloader) -> Self {
        Self {
            root: root.into(),
            registry,
            downloader,
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Directory a registered model resolves into.
    pub fn model_dir(&self, model_id: &str) -> Result<PathBuf, CacheError> {
        let entry = self.entry(model_id)?;
        Ok(self.dir_for(&entry))
    }

    /// Resolve `model_id` to verified local files.
    pub async fn resolve(
        &self,
        model_id: &str,
        ct: &CancellationToken,
    ) -> Result<ResolvedModel, CacheError> {
        self.resolve_with_progress(model_id, |_| {}, ct).await
    }

    /// [`Self::resolve`], reporting download progress for each artifact.
    ///
    /// Concurrent calls for the same model queue behind one another; the
    /// later ones find the cache populated and return without downloading.
    pub async fn resolve_with_progress<F>(
        &self,
        model_id: &str,
        mut on_progress: F,
        ct: &CancellationToken,
    ) -> Result<ResolvedModel, CacheError>
    where
        F: FnMut(&DownloadProgress),
    {
        let entry = self.entry(model_id)?;
        let lock = self.lock_for(&entry);
        let _guard = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(CacheError::Cancelled),
            guard = lock.lock() => guard,
        };

        let dir = self.dir_for(&entry);
        let artifacts = entry.artifacts();
        let resolved = ResolvedModel {
            name: entry.name.clone(),
            dir: dir.clone(),
            files: artifacts.iter().map(|a| dir.join(&a.file_name)).collect(),
        };

        let stale = self.stale_artifacts(&dir, &artifacts, ct).await?;
        if stale.is_empty() {
            debug!(model = %entry.name, path = ?dir, "Cache hit");
            return Ok(resolved);
        }

        info!(
            model = %entry.name,
            version = %entry.version,
            missing = stale.len(),
            total = artifacts.len(),
            "Fetching model files"
        );

        for artifact in &stale {
            if let Err(e) = self
                .fetch_artifact(&entry, &dir, artifact, &mut on_progress, ct)
                .await
            {
                remove_model_dir(&dir).await;
                return Err(e);
            }
        }

        info!(model = %entry.name, path = ?dir, "Model ready");
        Ok(resolved)
    }

    /// Whether every artifact of `model_id` is present and verifies.
    ///
    /// Never touches the network.
    pub async fn is_cached(&self, model_id: &str) -> Result<bool, CacheError> {
        let entry = self.entry(model_id)?;
        let dir = self.dir_for(&entry);
        let stale = self
            .stale_artifacts(&dir, &entry.artifacts(), &CancellationToken::new())
            .await?;
        Ok(stale.is_empty())
    }

    /// Remove the cached files of `model_id`. Returns whether anything was removed.
    pub async fn purge(&self, model_id: &str) -> Result<bool, CacheError> {
        let entry = self.entry(model_id)?;
        let lock = self.lock_for(&entry);
        let _guard = lock.lock().await;

        let dir = self.dir_for(&entry);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(model = %entry.name, path = ?dir, "Purged model");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entry(&self, model_id: &str) -> Result<RegistryEntry, CacheError> {
        self.registry
            .lookup(model_id)
            .map_err(|_| CacheError::NotRegistered(model_id.to_string()))
    }

    fn dir_for(&self, entry: &RegistryEntry) -> PathBuf {
        self.root.join(sanitize_model_id(&entry.name))
    }

    /// Lock for one model directory; created on first use and kept for the
    /// process lifetime.
    fn lock_for(&self, entry: &RegistryEntry) -> Arc<Mutex<()>> {
        self.locks
            .entry(sanitize_model_id(&entry.name).to_lowercase())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn stale_artifacts(
        &self,
        dir: &Path,
        artifacts: &[ModelFile],
        ct: &CancellationToken,
    ) -> Result<Vec<ModelFile>, CacheError> {
        let mut stale = Vec::new();
        for artifact in artifacts {
            let path = dir.join(&artifact.file_name);
            let fresh =
                checksum::verify_cancellable_async(path, artifact.checksum.clone(), ct.clone())
                    .await
                    .map_err(|_| CacheError::Cancelled)?;
            if !fresh {
                stale.push(artifact.clone());
            }
        }
        Ok(stale)
    }

    async fn fetch_artifact<F>(
        &self,
        entry: &RegistryEntry,
        dir: &Path,
        artifact: &ModelFile,
        on_progress: &mut F,
        ct: &CancellationToken,
    ) -> Result<(), CacheError>
    where
        F: FnMut(&DownloadProgress),
    {
        let expected: Checksum = artifact.checksum.parse()?;
        let target = dir.join(&artifact.file_name);
        let staging = dir.join(format!("{}{}", artifact.file_name, STAGING_SUFFIX));

        tokio::fs::create_dir_all(dir).await?;
        remove_file_if_present(&target).await?;

        self.downloader
            .download(&artifact.url, &staging, &mut *on_progress, ct)
            .await
            .map_err(|source| match source {
                DownloadError::Cancelled => CacheError::Cancelled,
                source => CacheError::DownloadFailed {
                    model: entry.name.clone(),
                    file: artifact.file_name.clone(),
                    source,
                },
            })?;

        let actual = checksum::digest_file_cancellable(expected.algorithm(), staging.clone(), ct.clone())
            .await
            .map_err(|e| {
                if ct.is_cancelled() {
                    CacheError::Cancelled
                } else {
                    CacheError::from(e)
                }
            })?;
        if actual != expected {
            warn!(
                model = %entry.name,
                file = %artifact.file_name,
                %expected,
                %actual,
                "Downloaded file failed verification"
            );
            remove_file_if_present(&staging).await?;
            return Err(CacheError::VerificationFailed {
                model: entry.name.clone(),
                file: artifact.file_name.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        tokio::fs::rename(&staging, &target).await?;
        debug!(model = %entry.name, file = %artifact.file_name, "Verified");
        Ok(())
    }
}

async fn remove_file_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Best-effort rollback; errors are logged so they never mask the cause.
async fn remove_model_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = ?dir, "Rolled back model directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?dir, error = %e, "Failed to roll back model directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use atlas_types::DownloadSettings;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha256(bytes: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
    }

    fn cache_with(temp: &TempDir, registry_json: &str) -> ModelCache {
        let registry = Registry::from_slice(registry_json.as_bytes()).unwrap();
        let downloader = Downloader::from_settings(&DownloadSettings::default()).unwrap();
        ModelCache::new(
            temp.path().join("models"),
            Arc::new(ModelRegistry::with_baseline(registry)),
            downloader,
        )
    }

    fn single_file_registry(server: &MockServer, checksum: &str) -> String {
        format!(
            r#"{{"registryUrl":"{uri}/registry.json","lastUpdated":"2024-01-01T00:00:00Z","entries":[
                {{"name":"org/tiny","version":"1","url":"{uri}/tiny.gguf","checksum":"{checksum}"}}]}}"#,
            uri = server.uri()
        )
    }

    async fn mount_file(server: &MockServer, route: &str, body: &[u8], times: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn test_sanitize_model_id() {
        assert_eq!(sanitize_model_id("org/name"), "org_name");
        assert_eq!(sanitize_model_id("a\\b/c"), "a_b_c");
        assert_eq!(sanitize_model_id(".."), "_..");
        assert_eq!(sanitize_model_id(""), "_");
        assert!(!sanitize_model_id("org/name").contains('/'));
    }

    #[test]
    fn test_sanitized_dir_stays_under_root() {
        let temp = TempDir::new().unwrap();
        let registry = r#"{"registryUrl":"u","lastUpdated":"2024-01-01T00:00:00Z","entries":[
            {"name":"org/name","version":"1","url":"https://h/m.bin","checksum":"sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"}]}"#;
        let cache = cache_with(&temp, registry);

        let dir = cache.model_dir("org/name").unwrap();
        assert_eq!(dir.parent().unwrap(), cache.root());
        assert_eq!(dir.file_name().unwrap(), "org_name");
    }

    #[tokio::test]
    async fn test_resolve_unknown_model() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(b"x")));

        let err = cache
            .resolve("nope", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotRegistered(ref id) if id == "nope"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let server = MockServer::start().await;
        let body = b"gguf weights".to_vec();
        mount_file(&server, "/tiny.gguf", &body, 1).await;

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(&body)));
        let ct = CancellationToken::new();

        let first = cache.resolve("org/tiny", &ct).await.unwrap();
        let second = cache.resolve("ORG/TINY", &ct).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(first.path()).unwrap(), body);
        assert!(cache.is_cached("org/tiny").await.unwrap());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_redownloaded() {
        let server = MockServer::start().await;
        let body = b"the real weights".to_vec();
        mount_file(&server, "/tiny.gguf", &body, 1).await;

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(&body)));

        let dir = cache.model_dir("org/tiny").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tiny.gguf"), b"bit rot").unwrap();
        assert!(!cache.is_cached("org/tiny").await.unwrap());

        let resolved = cache
            .resolve("org/tiny", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(resolved.path()).unwrap(), body);
        assert!(checksum::verify(resolved.path(), &sha256(&body)));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_nothing_behind() {
        let server = MockServer::start().await;
        mount_file(&server, "/tiny.gguf", b"tampered", 1).await;

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(b"expected")));

        let err = cache
            .resolve("org/tiny", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::VerificationFailed { .. }));
        assert!(err.is_retryable());
        assert!(!cache.model_dir("org/tiny").unwrap().exists());
    }

    #[tokio::test]
    async fn test_multi_file_failure_rolls_back_directory() {
        let server = MockServer::start().await;
        let weights = b"weights".to_vec();
        mount_file(&server, "/model.safetensors", &weights, 1).await;
        Mock::given(method("GET"))
            .and(path("/tokenizer.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = format!(
            r#"{{"registryUrl":"r","lastUpdated":"2024-01-01T00:00:00Z","entries":[
                {{"name":"minilm","version":"1","url":"{uri}/model.safetensors","checksum":"{w}",
                  "files":[{{"fileName":"tokenizer.json","url":"{uri}/tokenizer.json","checksum":"{t}"}}]}}]}}"#,
            uri = server.uri(),
            w = sha256(&weights),
            t = sha256(b"tokenizer"),
        );

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &registry);

        let err = cache
            .resolve("minilm", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::DownloadFailed {
                source: DownloadError::HttpStatus { status: 503, .. },
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(!cache.model_dir("minilm").unwrap().exists());
    }

    #[tokio::test]
    async fn test_multi_file_resolve() {
        let server = MockServer::start().await;
        let weights = b"weights".to_vec();
        let config = b"{\"hidden_size\":384}".to_vec();
        mount_file(&server, "/model.safetensors", &weights, 1).await;
        mount_file(&server, "/config.json", &config, 1).await;

        let registry = format!(
            r#"{{"registryUrl":"r","lastUpdated":"2024-01-01T00:00:00Z","entries":[
                {{"name":"minilm","version":"1","url":"{uri}/model.safetensors","checksum":"{w}",
                  "files":[{{"fileName":"config.json","url":"{uri}/config.json","checksum":"{c}"}}]}}]}}"#,
            uri = server.uri(),
            w = sha256(&weights),
            c = sha256(&config),
        );

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &registry);
        let resolved = cache
            .resolve("minilm", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolved.files.len(), 2);
        assert_eq!(resolved.path(), resolved.dir.join("model.safetensors"));
        assert_eq!(std::fs::read(resolved.file("config.json").unwrap()).unwrap(), config);
        assert!(resolved.file("missing.json").is_none());

        // Only the damaged artifact is fetched again.
        std::fs::write(resolved.dir.join("config.json"), b"{}").unwrap();
        server.reset().await;
        mount_file(&server, "/config.json", &config, 1).await;
        cache
            .resolve("minilm", &CancellationToken::new())
            .await
            .unwrap();
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/config.json");
    }

    #[tokio::test]
    async fn test_concurrent_resolves_download_once() {
        let server = MockServer::start().await;
        let body = vec![9u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/tiny.gguf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body.clone())
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = Arc::new(cache_with(&temp, &single_file_registry(&server, &sha256(&body))));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve("org/tiny", &CancellationToken::new()).await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().path().to_path_buf());
        }
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolve_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(b"slow")));
        let ct = CancellationToken::new();
        let canceller = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = cache.resolve("org/tiny", &ct).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!cache.model_dir("org/tiny").unwrap().exists());
    }

    #[tokio::test]
    async fn test_cancel_while_verifying_large_cached_file() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        let expected = format!("sha256:{}", "0".repeat(64));
        let cache = cache_with(&temp, &single_file_registry(&server, &expected));

        // Sparse 4 GiB file: hashing it to the end takes seconds.
        let dir = cache.model_dir("org/tiny").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        let cached = std::fs::File::create(dir.join("tiny.gguf")).unwrap();
        cached.set_len(4 << 30).unwrap();

        let ct = CancellationToken::new();
        let canceller = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = cache.resolve("org/tiny", &ct).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_shared_by_names_with_same_directory() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(b"x")));

        let entry = cache.entry("org/tiny").unwrap();
        let mut alias = entry.clone();
        alias.name = "ORG_tiny".to_string();
        assert!(Arc::ptr_eq(&cache.lock_for(&entry), &cache.lock_for(&alias)));
    }

    #[tokio::test]
    async fn test_purge() {
        let server = MockServer::start().await;
        let body = b"weights".to_vec();
        mount_file(&server, "/tiny.gguf", &body, 1).await;

        let temp = TempDir::new().unwrap();
        let cache = cache_with(&temp, &single_file_registry(&server, &sha256(&body)));
        cache
            .resolve("org/tiny", &CancellationToken::new())
            .await
            .unwrap();

        assert!(cache.purge("org/tiny").await.unwrap());
        assert!(!cache.purge("org/tiny").await.unwrap());
        assert!(!cache.is_cached("org/tiny").await.unwrap());
    }
}
