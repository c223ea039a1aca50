//! Error types for the crypto module.

use thiserror::Error;

/// Errors from sealing, opening, and key handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sealing failed. Nothing is persisted when this occurs.
    #[error("seal failed: {0}")]
    Seal(String),

    /// Ciphertext failed authentication: tampered, truncated, or sealed
    /// under different associated data. Fails closed.
    #[error("ciphertext authentication failed")]
    AuthenticationFailure,

    /// Ciphertext is too short to even carry a nonce.
    #[error("ciphertext truncated: {0} bytes")]
    Truncated(usize),

    /// The payload was sealed by a key this service does not hold.
    #[error("unknown key id: {0}")]
    UnknownKey(String),

    /// The keystore file exists but cannot be understood.
    #[error("malformed keystore: {0}")]
    MalformedKeystore(String),

    /// Keystore I/O error.
    #[error("keystore I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
