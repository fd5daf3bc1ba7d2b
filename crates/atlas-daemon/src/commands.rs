//! Command implementations for the `atlas` binary.
//!
//! Every command loads settings, wires the asset cache and, where needed,
//! the search index, then prints its result to stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use atlas_assets::{
    checksum, DigestAlgorithm, Downloader, Ed25519Verifier, ModelCache, ModelRegistry,
};
use atlas_types::Settings;
use atlas_vector::{GeoVectorIndex, IndexConfig, RocksRecordStore};

use crate::cli::{Cli, RegistryCommands};
use crate::progress::stderr_printer;

/// Directory under the cache root holding the persisted remote registry
const REGISTRY_DIR: &str = "registry";

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(cache_dir) = &cli.cache_dir {
        settings.cache_dir = cache_dir.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Token cancelled on Ctrl+C.
pub fn shutdown_token() -> CancellationToken {
    let ct = CancellationToken::new();
    let trigger = ct.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling...");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
    ct
}

fn open_registry(settings: &Settings) -> Result<ModelRegistry> {
    // The embedded registry is part of the build; failing to parse it is fatal.
    let mut registry = ModelRegistry::load().context("Embedded model registry is invalid")?;

    if let Some(key) = &settings.registry.public_key {
        let verifier = Ed25519Verifier::from_hex(key).context("Invalid registry public key")?;
        registry = registry.with_verifier(Arc::new(verifier));
    }
    if let Some(url) = &settings.registry.url {
        registry = registry.with_remote_url(url.clone());
    }

    Ok(registry.with_persist_dir(settings.expanded_cache_dir().join(REGISTRY_DIR)))
}

async fn open_cache(settings: &Settings, ct: &CancellationToken) -> Result<ModelCache> {
    let registry = Arc::new(open_registry(settings)?);
    let downloader =
        Downloader::from_settings(&settings.download).context("Failed to build HTTP client")?;

    if settings.registry.refresh_on_start {
        registry.refresh(downloader.client(), ct).await;
    }

    let root = settings.expanded_cache_dir();
    debug!(path = ?root, source = registry.source().as_str(), "Opened model cache");
    Ok(ModelCache::new(root, registry, downloader))
}

/// Resolve a model to verified local files and print their paths.
pub async fn handle_resolve(settings: &Settings, model: &str, ct: &CancellationToken) -> Result<()> {
    let cache = open_cache(settings, ct).await?;
    let resolved = cache
        .resolve_with_progress(model, stderr_printer(), ct)
        .await
        .with_context(|| format!("Failed to resolve {}", model))?;

    for file in &resolved.files {
        println!("{}", file.display());
    }
    Ok(())
}

/// Print the active registry entry for a model.
pub async fn handle_lookup(settings: &Settings, model: &str, ct: &CancellationToken) -> Result<()> {
    let cache = open_cache(settings, ct).await?;
    let entry = cache.registry().lookup(model)?;

    println!("Name:         {}", entry.name);
    println!("Version:      {}", entry.version);
    if let Some(quantization) = &entry.quantization {
        println!("Quantization: {}", quantization);
    }
    println!("Source:       {}", cache.registry().source().as_str());
    println!("Cached:       {}", cache.is_cached(model).await?);
    println!("Directory:    {}", cache.model_dir(model)?.display());
    for artifact in entry.artifacts() {
        println!("  {}  {}", artifact.file_name, artifact.checksum);
        println!("    {}", artifact.url);
    }
    Ok(())
}

/// Registry refresh and listing.
pub async fn handle_registry(
    settings: &Settings,
    command: RegistryCommands,
    ct: &CancellationToken,
) -> Result<()> {
    match command {
        RegistryCommands::Refresh => {
            let registry = open_registry(settings)?;
            let downloader = Downloader::from_settings(&settings.download)
                .context("Failed to build HTTP client")?;

            if registry.refresh(downloader.client(), ct).await {
                println!(
                    "Registry refreshed from {} ({} models)",
                    registry.remote_url(),
                    registry.active().entries.len()
                );
            } else {
                println!(
                    "Refresh failed; keeping {} registry ({} models)",
                    registry.source().as_str(),
                    registry.active().entries.len()
                );
            }
        }
        RegistryCommands::List => {
            let cache = open_cache(settings, ct).await?;
            let active = cache.registry().active();
            println!(
                "{} registry, updated {}",
                cache.registry().source().as_str(),
                active.last_updated
            );
            for entry in &active.entries {
                let cached = cache.is_cached(&entry.name).await?;
                println!(
                    "{:<32} {:<10} {:<8} {}",
                    entry.name,
                    entry.version,
                    entry.quantization.as_deref().unwrap_or("-"),
                    if cached { "cached" } else { "" }
                );
            }
        }
    }
    Ok(())
}

/// Print `<algorithm>:<hex>  <file>`.
pub async fn handle_checksum(file: &Path, algorithm: &str) -> Result<()> {
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let digest = checksum::digest_file_async(algorithm, file.to_path_buf())
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}  {}", digest, file.display());
    Ok(())
}

/// Remove a model's cached files.
pub async fn handle_purge(settings: &Settings, model: &str, ct: &CancellationToken) -> Result<()> {
    let cache = open_cache(settings, ct).await?;
    if cache.purge(model).await? {
        println!("Removed {}", cache.model_dir(model)?.display());
    } else {
        println!("{} is not cached", model);
    }
    Ok(())
}

async fn open_index(
    settings: &Settings,
    db_path: Option<&str>,
    ct: &CancellationToken,
) -> Result<GeoVectorIndex> {
    let path = match db_path {
        Some(p) => PathBuf::from(p),
        None => settings.expanded_db_path(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create database directory {}", path.display()))?;
    let store = RocksRecordStore::open(&path).context("Failed to open search database")?;
    let index = GeoVectorIndex::new(Arc::new(store), IndexConfig::from(&settings.embedding));

    attach_embedder(settings, index, ct).await
}

#[cfg(feature = "candle")]
async fn attach_embedder(
    settings: &Settings,
    index: GeoVectorIndex,
    ct: &CancellationToken,
) -> Result<GeoVectorIndex> {
    use atlas_embeddings::CandleEmbedder;

    let cache = open_cache(settings, ct).await?;
    let embedder = CandleEmbedder::load(&cache, &settings.embedding.model, ct)
        .await
        .with_context(|| format!("Failed to load embedding model {}", settings.embedding.model))?;
    Ok(index.with_embedder(Arc::new(embedder)))
}

#[cfg(not(feature = "candle"))]
async fn attach_embedder(
    _settings: &Settings,
    index: GeoVectorIndex,
    _ct: &CancellationToken,
) -> Result<GeoVectorIndex> {
    warn!("Built without an embedding backend; add and search will fail");
    Ok(index)
}

/// Embed and store one text.
pub async fn handle_add(
    settings: &Settings,
    text: &str,
    lat: f64,
    lng: f64,
    db_path: Option<&str>,
    ct: &CancellationToken,
) -> Result<()> {
    let index = open_index(settings, db_path, ct).await?;
    let record = index.add_item(text, lat, lng, ct).await?;
    println!("Added record {}", record.id);
    Ok(())
}

/// Print records near a point, best match first.
#[allow(clippy::too_many_arguments)]
pub async fn handle_search(
    settings: &Settings,
    query: &str,
    lat: f64,
    lng: f64,
    radius_km: f64,
    limit: Option<usize>,
    db_path: Option<&str>,
    ct: &CancellationToken,
) -> Result<()> {
    let index = open_index(settings, db_path, ct).await?;
    let results = index.search(query, lat, lng, radius_km, ct).await?;

    if results.is_empty() {
        println!("No results within {} km", radius_km);
        return Ok(());
    }
    for result in results.iter().take(limit.unwrap_or(usize::MAX)) {
        println!(
            "{:>7.4}  {:>8.2} km  #{:<6} {}",
            result.score, result.distance_km, result.id, result.text
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "atlas",
            "registry",
            "list",
            "--cache-dir",
            "/tmp/atlas-test-cache",
            "--log-level",
            "trace",
        ]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.cache_dir, "/tmp/atlas-test-cache");
        assert_eq!(settings.log_level, "trace");
    }

    #[test]
    fn test_open_registry_rejects_bad_key() {
        let mut settings = Settings::default();
        settings.registry.public_key = Some("not-hex".to_string());
        assert!(open_registry(&settings).is_err());
    }

    #[tokio::test]
    async fn test_open_cache_uses_cache_dir() {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            cache_dir: temp.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let cache = open_cache(&settings, &CancellationToken::new()).await.unwrap();
        assert_eq!(cache.root(), temp.path());
        assert!(!cache.is_cached(&settings.embedding.model).await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_and_purge_honour_shutdown_token() {
        // Accepts connections but never answers, so only cancellation ends the refresh.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut settings = Settings {
            cache_dir: temp.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        settings.registry.url = Some(format!(
            "http://{}/registry.json",
            silent.local_addr().unwrap()
        ));
        settings.registry.refresh_on_start = true;
        let model = settings.embedding.model.clone();

        let ct = CancellationToken::new();
        let trigger = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let limit = std::time::Duration::from_secs(10);
        let purged = tokio::time::timeout(limit, handle_purge(&settings, &model, &ct)).await;
        assert!(matches!(purged, Ok(Ok(()))));
        let looked_up = tokio::time::timeout(limit, handle_lookup(&settings, &model, &ct)).await;
        assert!(matches!(looked_up, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_checksum_command() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        assert!(handle_checksum(&file, "sha256").await.is_ok());
        assert!(handle_checksum(&file, "md5").await.is_err());
        assert!(handle_checksum(&temp.path().join("missing"), "sha256")
            .await
            .is_err());
    }
}
