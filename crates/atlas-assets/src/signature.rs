//! Signature verification for remote registry documents.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::error::RegistryError;

/// Verifies a detached signature over a byte string.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 verification against a pinned public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Parse a hex-encoded 32-byte public key.
    pub fn from_hex(hex_key: &str) -> Result<Self, RegistryError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| RegistryError::Signature(format!("invalid public key hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| RegistryError::Signature("public key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| RegistryError::Signature(e.to_string()))?;
        Ok(Self { key })
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.key.verify_strict(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Used when no public key is configured: nothing remote is trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllVerifier;

impl SignatureVerifier for RejectAllVerifier {
    fn verify(&self, _message: &[u8], _signature: &[u8]) -> bool {
        false
    }
}

/// Decode a hex-encoded detached signature, ignoring surrounding whitespace.
pub fn decode_signature(text: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(text).ok()?;
    hex::decode(text.trim()).ok()
}
