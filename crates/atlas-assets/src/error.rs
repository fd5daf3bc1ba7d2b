//! Error types for checksums, downloads, the registry and the cache.

use thiserror::Error;

/// Errors from parsing or computing digests.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Algorithm prefix is not one we can compute
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Not of the form `<algorithm>:<hex>`
    #[error("Malformed checksum: {0}")]
    Malformed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while downloading a single resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Caller cancelled the transfer
    #[error("Download cancelled")]
    Cancelled,

    /// Connection, TLS, timeout or body stream failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Body ended before the advertised content length
    #[error("Incomplete body: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    /// IO error writing the destination file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::Network(_)
                | DownloadError::HttpStatus { .. }
                | DownloadError::Incomplete { .. }
        )
    }
}

/// Errors from loading, refreshing or querying the model registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No entry with this name
    #[error("Model not registered: {0}")]
    NotFound(String),

    /// Document could not be parsed
    #[error("Invalid registry document: {0}")]
    Parse(String),

    /// Two entries share a name (case-insensitive)
    #[error("Duplicate registry entry: {0}")]
    DuplicateEntry(String),

    /// Two entries map to the same cache directory
    #[error("Registry entries {first} and {second} share a cache directory")]
    PathCollision { first: String, second: String },

    /// Remote document dropped an identifier the baseline ships
    #[error("Registry is missing baseline entry: {0}")]
    MissingBaselineEntry(String),

    /// Remote document is older than the active one
    #[error("Registry is older than the active registry ({candidate} < {active})")]
    Stale { candidate: String, active: String },

    /// Signature absent, malformed or not matching
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Remote document could not be fetched
    #[error("Failed to fetch registry: {0}")]
    Fetch(String),

    /// Refresh cancelled by the caller
    #[error("Registry refresh cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

/// Errors returned by [`crate::ModelCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Identifier is not in the active registry
    #[error("Model not registered: {0}")]
    NotRegistered(String),

    /// Download of one of the model's artifacts failed
    #[error("Failed to download {file} for {model}: {source}")]
    DownloadFailed {
        model: String,
        file: String,
        #[source]
        source: DownloadError,
    },

    /// Downloaded bytes do not match the registry digest
    #[error("Checksum mismatch for {file} of {model}: expected {expected}, got {actual}")]
    VerificationFailed {
        model: String,
        file: String,
        expected: String,
        actual: String,
    },

    /// Caller cancelled the resolve
    #[error("Resolve cancelled")]
    Cancelled,

    /// Registry digest could not be interpreted
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether the caller may retry the whole resolve.
    ///
    /// Verification failures purge the entry first, so one retry is allowed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::DownloadFailed { source, .. } => source.is_transient(),
            CacheError::VerificationFailed { .. } => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}
