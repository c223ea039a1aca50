//! Error types for the Fieldnote facade.

use thiserror::Error;

/// Errors surfaced by the facade.
#[derive(Debug, Error)]
pub enum FieldnoteError {
    /// Keystore or cipher failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] fieldnote_crypto::CryptoError),

    /// Storage failure.
    #[error("store error: {0}")]
    Store(#[from] fieldnote_store::StoreError),

    /// Queue operation failure.
    #[error("queue error: {0}")]
    Queue(#[from] fieldnote_queue::QueueError),

    /// Sync driver failure.
    #[error("sync error: {0}")]
    Sync(#[from] fieldnote_sync::SyncError),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, FieldnoteError>;
