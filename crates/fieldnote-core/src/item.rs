//! Queue items, sync attempts, and the delivery state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{IdempotencyKey, ItemId};

/// Reserved `fail_reason` for items whose ciphertext no longer opens.
///
/// This failure is fatal for the item: it is parked in `failed` and never
/// offered for automatic retry again (see [`crate::BackoffPolicy::eligible`]).
pub const DECRYPTION_FAILURE: &str = "decryption_failure";

/// Reserved `fail_reason` for items reclaimed from a stale `syncing` state
/// after a crash or forced cancellation.
pub const STALE_SYNCING: &str = "stale_syncing";

/// Deployment context tag for an item. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Demo,
    Prod,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Demo => "demo",
            Mode::Prod => "prod",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demo" => Ok(Mode::Demo),
            "prod" => Ok(Mode::Prod),
            other => Err(ValidationError::UnknownMode(other.to_string())),
        }
    }
}

/// Delivery state of a queue item.
///
/// Legal transitions:
///
/// ```text
/// queued ──> syncing ──> synced   (terminal)
///              │  ▲
///              ▼  │
///             failed  (retry re-enters syncing)
/// ```
///
/// No item skips `queued`, and nothing ever leaves `synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Syncing,
    Synced,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Syncing => "syncing",
            QueueStatus::Synced => "synced",
            QueueStatus::Failed => "failed",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Queued, QueueStatus::Syncing)
                | (QueueStatus::Syncing, QueueStatus::Synced)
                | (QueueStatus::Syncing, QueueStatus::Failed)
                | (QueueStatus::Failed, QueueStatus::Syncing)
        )
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Synced)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "syncing" => Ok(QueueStatus::Syncing),
            "synced" => Ok(QueueStatus::Synced),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// One structured record pending or completed delivery.
///
/// The payload is opaque ciphertext from the queue's point of view; it is
/// sealed once at creation and re-sent byte-identical on every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: ItemId,
    pub idempotency_key: IdempotencyKey,
    pub mode: Mode,
    /// Fingerprint of the cipher key that sealed this payload. Lets a
    /// future key rotation be layered in without a schema change.
    pub key_id: String,
    pub ciphertext: Vec<u8>,
    pub status: QueueStatus,
    /// Last error description, if any attempt has failed.
    pub fail_reason: Option<String>,
    /// Number of failed delivery attempts. Never decremented.
    pub retry_count: u32,
    /// Unix ms.
    pub created_at: i64,
    /// Unix ms; advances on every status transition.
    pub updated_at: i64,
}

impl QueueItem {
    /// Build a freshly enqueued item: status `queued`, zero retries.
    pub fn new(
        id: ItemId,
        idempotency_key: IdempotencyKey,
        mode: Mode,
        key_id: String,
        ciphertext: Vec<u8>,
        now_ms: i64,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            mode,
            key_id,
            ciphertext,
            status: QueueStatus::Queued,
            fail_reason: None,
            retry_count: 0,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

/// Immutable audit record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub item_id: ItemId,
    /// Unix ms.
    pub attempted_at: i64,
    pub success: bool,
    pub response_code: Option<u16>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl SyncAttempt {
    pub fn success(
        item_id: ItemId,
        attempted_at: i64,
        response_code: Option<u16>,
        duration_ms: Option<i64>,
    ) -> Self {
        Self {
            item_id,
            attempted_at,
            success: true,
            response_code,
            error_message: None,
            duration_ms,
        }
    }

    pub fn failure(
        item_id: ItemId,
        attempted_at: i64,
        error_message: impl Into<String>,
        response_code: Option<u16>,
        duration_ms: Option<i64>,
    ) -> Self {
        Self {
            item_id,
            attempted_at,
            success: false,
            response_code,
            error_message: Some(error_message.into()),
            duration_ms,
        }
    }
}
