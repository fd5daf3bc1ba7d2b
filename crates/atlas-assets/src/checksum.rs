//! Algorithm-prefixed file digests.
//!
//! Digests are rendered as `<algorithm>:<lowercase-hex>`, e.g.
//! `sha256:9f86d0...`. Files are hashed in fixed-size blocks so multi-GB
//! weights never have to fit in memory.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChecksumError;

/// Read buffer used while hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex rendering
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(ChecksumError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A normalized, algorithm-prefixed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest without the prefix
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    /// Parses `sha256:<hex>` case-insensitively.
    ///
    /// A bare 64-character hex string is accepted as SHA-256.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (algorithm, hex) = match trimmed.split_once(':') {
            Some((alg, hex)) => (alg.parse::<DigestAlgorithm>()?, hex.trim()),
            None if trimmed.len() == DigestAlgorithm::Sha256.hex_len() => {
                (DigestAlgorithm::Sha256, trimmed)
            }
            None => return Err(ChecksumError::Malformed(trimmed.to_string())),
        };

        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::Malformed(trimmed.to_string()));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R, ct: &CancellationToken) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        if ct.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "digest cancelled"));
        }
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Read `reader` to completion and return its digest.
pub fn digest<R: Read>(algorithm: DigestAlgorithm, reader: R) -> io::Result<Checksum> {
    digest_cancellable(algorithm, reader, &CancellationToken::new())
}

/// [`digest`], checking `ct` before every block.
///
/// A cancelled token fails with [`io::ErrorKind::Interrupted`].
pub fn digest_cancellable<R: Read>(
    algorithm: DigestAlgorithm,
    reader: R,
    ct: &CancellationToken,
) -> io::Result<Checksum> {
    let hex = match algorithm {
        DigestAlgorithm::Sha256 => hash_reader::<Sha256, _>(reader, ct)?,
        DigestAlgorithm::Sha512 => hash_reader::<Sha512, _>(reader, ct)?,
    };
    Ok(Checksum { algorithm, hex })
}

/// Digest of a file on disk.
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> io::Result<Checksum> {
    let file = File::open(path)?;
    digest(algorithm, file)
}

/// Digest of a file, computed on the blocking pool.
pub async fn digest_file_async(algorithm: DigestAlgorithm, path: PathBuf) -> io::Result<Checksum> {
    digest_file_cancellable(algorithm, path, CancellationToken::new()).await
}

/// [`digest_file_async`] that stops reading once `ct` is cancelled.
pub async fn digest_file_cancellable(
    algorithm: DigestAlgorithm,
    path: PathBuf,
    ct: CancellationToken,
) -> io::Result<Checksum> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        digest_cancellable(algorithm, file, &ct)
    })
    .await
    .map_err(io::Error::other)?
}

/// Recompute the digest of `path` and compare it with `expected`.
///
/// Never fails: a missing file, an unreadable file or a malformed
/// expectation all report `false`.
pub fn verify(path: &Path, expected: &str) -> bool {
    verify_cancellable(path, expected, &CancellationToken::new()).unwrap_or(false)
}

/// [`verify`], checking `ct` before every block.
///
/// The only error is cancellation; every other failure reports `false`.
pub fn verify_cancellable(path: &Path, expected: &str, ct: &CancellationToken) -> io::Result<bool> {
    let expected: Checksum = match expected.parse() {
        Ok(c) => c,
        Err(e) => {
            warn!(path = ?path, error = %e, "Cannot verify against malformed checksum");
            return Ok(false);
        }
    };

    let result = File::open(path).and_then(|file| digest_cancellable(expected.algorithm(), file, ct));
    match result {
        Ok(actual) => {
            let matches = actual == expected;
            if !matches {
                debug!(path = ?path, %expected, %actual, "Checksum mismatch");
            }
            Ok(matches)
        }
        Err(e) if ct.is_cancelled() => Err(e),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            debug!(path = ?path, error = %e, "Failed to hash file");
            Ok(false)
        }
    }
}

/// [`verify`] on the blocking pool.
pub async fn verify_async(path: PathBuf, expected: String) -> bool {
    tokio::task::spawn_blocking(move || verify(&path, &expected))
        .await
        .unwrap_or(false)
}

/// [`verify_cancellable`] on the blocking pool.
pub async fn verify_cancellable_async(
    path: PathBuf,
    expected: String,
    ct: CancellationToken,
) -> io::Result<bool> {
    tokio::task::spawn_blocking(move || verify_cancellable(&path, &expected, &ct))
        .await
        .map_err(io::Error::other)?
}
