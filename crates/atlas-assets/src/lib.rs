//! # atlas-assets
//!
//! Resolves logical model identifiers to verified local files.
//!
//! ## Components
//! - `checksum`: streaming, algorithm-prefixed digests (`sha256:<hex>`)
//! - `download`: chunked HTTP download with progress and cancellation
//! - `registry`: embedded baseline registry with signed remote refresh
//! - `cache`: per-model serialized resolve with self-healing on corruption
//!
//! ## Guarantees
//! - A cache hit never touches the network
//! - A resolved path always holds bytes matching the registry digest
//! - A failed download leaves no directory behind for that model

pub mod cache;
pub mod checksum;
pub mod download;
pub mod error;
pub mod progress;
pub mod registry;
pub mod signature;

pub use cache::{sanitize_model_id, ModelCache, ResolvedModel};
pub use checksum::{Checksum, DigestAlgorithm};
pub use download::{build_http_client, Downloader};
pub use error::{CacheError, ChecksumError, DownloadError, RegistryError};
pub use progress::{DownloadProgress, ProgressTracker};
pub use registry::{ModelFile, ModelRegistry, Registry, RegistryEntry, RegistrySource};
pub use signature::{Ed25519Verifier, RejectAllVerifier, SignatureVerifier};
