//! Retry backoff policy.
//!
//! A failing item must not be retried on every sync cycle: each failure
//! pushes its next eligible retry further out, up to a cap. The policy is a
//! pure function of `(item, now)` so it can be exercised in tests with a
//! manual clock and no real delay.

use crate::item::{QueueItem, QueueStatus, DECRYPTION_FAILURE};

/// Exponential backoff with a cap and a retry ceiling.
///
/// The delay after `n` failed attempts is `base_ms * 2^n`, capped at
/// `cap_ms`. Items that have failed `max_retries` times stay in `failed`
/// indefinitely for manual review; they are never auto-discarded.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub cap_ms: i64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 30_000,
            cap_ms: 300_000,
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next retry after `retry_count` failed attempts.
    pub fn delay_ms(&self, retry_count: u32) -> i64 {
        let shift = retry_count.min(32);
        self.base_ms
            .saturating_mul(1i64.checked_shl(shift).unwrap_or(i64::MAX))
            .min(self.cap_ms)
    }

    /// Whether `dequeue_for_sync` may offer this item at time `now_ms`.
    ///
    /// `queued` items are always eligible. `failed` items wait out their
    /// backoff window, respect the retry ceiling, and are permanently
    /// excluded when the failure is non-retryable (ciphertext no longer
    /// opens). `syncing` and `synced` items are never offered.
    pub fn eligible(&self, item: &QueueItem, now_ms: i64) -> bool {
        match item.status {
            QueueStatus::Queued => true,
            QueueStatus::Failed => {
                if item.fail_reason.as_deref() == Some(DECRYPTION_FAILURE) {
                    return false;
                }
                if item.retry_count >= self.max_retries {
                    return false;
                }
                now_ms >= item.updated_at.saturating_add(self.delay_ms(item.retry_count))
            }
            QueueStatus::Syncing | QueueStatus::Synced => false,
        }
    }
}
