//! ChaCha20-Poly1305 cipher service.
//!
//! Sealed blob layout: `nonce (12 bytes) || ciphertext+tag`. The nonce is
//! random per seal; retries re-send the stored blob unchanged, so nonce
//! reuse across seals is the only hazard and random 96-bit nonces are fine
//! at queue volumes.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::error::{CryptoError, Result};

/// Length of the nonce prefix on every sealed blob.
const NONCE_LEN: usize = 12;

/// Short fingerprint identifying a cipher key.
///
/// Stored alongside each ciphertext so a future multi-key service can route
/// an open to the right key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(String);

impl KeyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 256-bit symmetric key for ChaCha20-Poly1305.
#[derive(Clone)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the key's public fingerprint.
    ///
    /// Uses blake3 keyed derivation for domain separation; the fingerprint
    /// reveals nothing about the key material.
    pub fn key_id(&self) -> KeyId {
        let mut hasher = blake3::Hasher::new_derive_key("fieldnote-v0-key-id");
        hasher.update(&self.0);
        let digest = hasher.finalize();
        KeyId(hex::encode(&digest.as_bytes()[..8]))
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "CipherKey({})", self.key_id())
    }
}

/// Authenticated-encryption service for queue payloads.
///
/// Constructed once at process start and injected into the queue manager;
/// the key is read-only shared state after initialization.
pub struct CipherService {
    cipher: ChaCha20Poly1305,
    key_id: KeyId,
}

impl CipherService {
    pub fn new(key: CipherKey) -> Self {
        let key_id = key.key_id();
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        Self { cipher, key_id }
    }

    /// The fingerprint of the key this service seals with.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Seal a plaintext under this service's key.
    ///
    /// `associated_data` is authenticated but not encrypted; the queue binds
    /// each payload to its item id this way, so a ciphertext moved to a
    /// different row will not open.
    pub fn seal(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|e| CryptoError::Seal(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Open a sealed blob.
    ///
    /// `key_id` is the fingerprint recorded when the blob was sealed. A
    /// mismatch means the payload belongs to a key this service does not
    /// hold (e.g. after an un-migrated rotation) and fails before any
    /// decryption is attempted.
    pub fn open(&self, key_id: &str, blob: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
        if key_id != self.key_id.as_str() {
            return Err(CryptoError::UnknownKey(key_id.to_string()));
        }
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Truncated(blob.len()));
        }

        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: sealed,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CipherService {
        CipherService::new(CipherKey::generate())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let svc = service();
        let blob = svc.seal(b"chief complaint: cough", b"item-1").unwrap();

        let plaintext = svc.open(svc.key_id().as_str(), &blob, b"item-1").unwrap();
        assert_eq!(plaintext, b"chief complaint: cough");
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let svc = service();
        let blob = svc.seal(b"SENSITIVE_DATA_12345", b"aad").unwrap();

        assert!(!blob.windows(b"SENSITIVE".len()).any(|w| w == b"SENSITIVE"));
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let svc = service();
        let a = svc.seal(b"same", b"aad").unwrap();
        let b = svc.seal(b"same", b"aad").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tamper_fails_closed() {
        let svc = service();
        let mut blob = svc.seal(b"payload", b"aad").unwrap();

        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        let err = svc.open(svc.key_id().as_str(), &blob, b"aad").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn test_truncation_detected() {
        let svc = service();
        let blob = svc.seal(b"payload", b"aad").unwrap();

        let err = svc
            .open(svc.key_id().as_str(), &blob[..8], b"aad")
            .unwrap_err();
        assert!(matches!(err, CryptoError::Truncated(8)));

        let err = svc
            .open(svc.key_id().as_str(), &blob[..blob.len() - 4], b"aad")
            .unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn test_wrong_associated_data_fails() {
        let svc = service();
        let blob = svc.seal(b"payload", b"item-1").unwrap();

        let err = svc.open(svc.key_id().as_str(), &blob, b"item-2").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = service();
        let b = service();
        let blob = a.seal(b"payload", b"aad").unwrap();

        // Fingerprint mismatch is caught before decryption.
        let err = b.open(a.key_id().as_str(), &blob, b"aad").unwrap_err();
        assert!(matches!(err, CryptoError::UnknownKey(_)));
    }

    #[test]
    fn test_key_id_deterministic() {
        let key = CipherKey::from_bytes([0x42; 32]);
        assert_eq!(key.key_id(), key.key_id());
        assert_ne!(key.key_id(), CipherKey::from_bytes([0x43; 32]).key_id());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = CipherKey::from_bytes([0x42; 32]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("42, 42"));
        assert!(!rendered.contains(&hex::encode([0x42; 32])));
    }
}
