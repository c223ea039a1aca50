//! Error types for Fieldnote core.

use thiserror::Error;

/// Validation errors for enqueue input and persisted field parsing.
///
/// These are rejected synchronously at the producer boundary; nothing
/// invalid is ever persisted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("unrecognized mode: {0}")]
    UnknownMode(String),

    #[error("unrecognized status: {0}")]
    UnknownStatus(String),

    #[error("invalid item id: {0}")]
    InvalidItemId(String),
}
