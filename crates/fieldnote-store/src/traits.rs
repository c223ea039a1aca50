//! QueueStore trait: the abstract interface for queue persistence.
//!
//! This trait allows the queue manager to be storage-agnostic.
//! Implementations include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeMap;

use async_trait::async_trait;

use fieldnote_core::{BackoffPolicy, ItemId, QueueItem, QueueStatus, SyncAttempt};

use crate::error::Result;

/// The QueueStore trait: async interface for queue persistence.
///
/// All methods are async to keep SQLite's blocking work off the runtime
/// (via `spawn_blocking` internally).
///
/// # Design Notes
///
/// - **Claim is the concurrency guard**: [`claim_batch`](Self::claim_batch)
///   selects eligible rows and flips them to `syncing` in one transaction,
///   so two concurrent callers can never hold the same item.
/// - **Attempt rows ride the transition**: `mark_synced`/`mark_failed`
///   update the row and append the attempt in a single transaction.
/// - **Conditional transitions**: `mark_*` apply only to items currently in
///   `syncing` and report a no-op otherwise, defending against duplicate
///   completion reports.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Item Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a freshly enqueued item.
    ///
    /// Fails if the id or idempotency key already exists; ids are never
    /// reused and keys never change.
    async fn insert_item(&self, item: &QueueItem) -> Result<()>;

    /// Get an item by id.
    async fn get_item(&self, id: &ItemId) -> Result<Option<QueueItem>>;

    /// Atomically claim up to `max_batch` items for delivery.
    ///
    /// Selects `queued`/`failed` rows eligible under `policy` at `now_ms`,
    /// oldest first, and transitions each to `syncing` in the same
    /// transaction. Returned items already carry the `syncing` status.
    async fn claim_batch(
        &self,
        max_batch: usize,
        now_ms: i64,
        policy: &BackoffPolicy,
    ) -> Result<Vec<QueueItem>>;

    /// Transition a `syncing` item to `synced` and append the attempt.
    ///
    /// Returns `false` (and writes nothing) if the item is not currently
    /// `syncing`.
    async fn mark_synced(&self, id: &ItemId, now_ms: i64, attempt: &SyncAttempt) -> Result<bool>;

    /// Transition a `syncing` item to `failed`, increment `retry_count`,
    /// record `reason`, and append the attempt.
    ///
    /// Returns `false` (and writes nothing) if the item is not currently
    /// `syncing`.
    async fn mark_failed(
        &self,
        id: &ItemId,
        reason: &str,
        now_ms: i64,
        attempt: &SyncAttempt,
    ) -> Result<bool>;

    /// Revert `syncing` items older than `staleness_ms` back to `failed`.
    ///
    /// Reconciles items orphaned by a crash or forced cancellation so they
    /// re-enter the retry cycle instead of being silently lost. Appends a
    /// failed attempt row per recovered item. Returns the recovered ids.
    async fn recover_stale(&self, now_ms: i64, staleness_ms: i64) -> Result<Vec<ItemId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only Status Interface
    // ─────────────────────────────────────────────────────────────────────────

    /// Aggregate item counts per status.
    async fn status_counts(&self) -> Result<BTreeMap<QueueStatus, u64>>;

    /// List items, newest first, optionally filtered by status and a
    /// `created_at` lower bound.
    async fn list_items(
        &self,
        status: Option<QueueStatus>,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<QueueItem>>;

    /// Delivery attempt history for an item, in attempt order.
    async fn attempts_for(&self, id: &ItemId) -> Result<Vec<SyncAttempt>>;
}
