//! Error types for the sync driver.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Queue-side failure while claiming or reporting outcomes.
    #[error("queue error: {0}")]
    Queue(#[from] fieldnote_queue::QueueError),

    /// The remote call did not complete within the configured timeout.
    #[error("delivery timed out")]
    Timeout,

    /// The remote answered with a non-success status.
    #[error("remote rejected delivery: status {status}")]
    Rejected { status: u16 },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// HTTP status carried by the failure, if the remote answered at all.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            SyncError::Rejected { status } => Some(*status),
            _ => None,
        }
    }

    /// Short machine-readable reason recorded on the queue item.
    pub fn fail_reason(&self) -> String {
        match self {
            SyncError::Queue(_) => "queue_error".to_string(),
            SyncError::Timeout => "timeout".to_string(),
            SyncError::Rejected { status } => format!("http_{status}"),
            SyncError::Transport(_) => "connection_error".to_string(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
