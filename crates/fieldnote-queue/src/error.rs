//! Error types for the queue manager.

use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed enqueue input; rejected synchronously, never persisted.
    #[error("validation error: {0}")]
    Validation(#[from] fieldnote_core::ValidationError),

    /// Cipher service failure. A seal failure aborts the enqueue with
    /// nothing persisted.
    #[error("cipher error: {0}")]
    Crypto(#[from] fieldnote_crypto::CryptoError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] fieldnote_store::StoreError),

    /// Payload could not be serialized.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
