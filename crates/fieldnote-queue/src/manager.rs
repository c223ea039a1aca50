//! The queue manager: enqueue, claim, and transition operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use fieldnote_core::{
    BackoffPolicy, Clock, IdempotencyKey, ItemId, Mode, QueueItem, QueueStatus, SyncAttempt,
    SystemClock, ValidationError, DECRYPTION_FAILURE,
};
use fieldnote_crypto::CipherService;
use fieldnote_store::QueueStore;

use crate::error::Result;

/// Configuration for the queue manager.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Identifies this device in idempotency keys.
    pub device_id: String,
    /// Retry scheduling for failed items.
    pub backoff: BackoffPolicy,
    /// Items stuck in `syncing` longer than this are reverted to `failed`
    /// by the recovery pass.
    pub stale_syncing_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            device_id: "local-device".to_string(),
            backoff: BackoffPolicy::default(),
            stale_syncing_ms: 600_000,
        }
    }
}

/// An item claimed for delivery, with its payload opened.
///
/// Carries everything the sync driver needs for one remote call and
/// nothing it doesn't - in particular, no ciphertext and no mutable state.
#[derive(Debug, Clone)]
pub struct DequeuedItem {
    pub id: ItemId,
    pub idempotency_key: IdempotencyKey,
    pub mode: Mode,
    pub plaintext: Bytes,
    pub retry_count: u32,
    pub created_at: i64,
}

/// The queue manager.
///
/// Sole owner of queue-item mutation. Producers may call
/// [`enqueue`](Self::enqueue) concurrently; a single sync driver consumes
/// via [`dequeue_for_sync`](Self::dequeue_for_sync) and the `mark_*`
/// operations. The cipher service and clock are injected so tests can use
/// deterministic keys and a manual clock.
pub struct QueueManager<S: QueueStore> {
    store: Arc<S>,
    cipher: Arc<CipherService>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl<S: QueueStore> QueueManager<S> {
    /// Create a queue manager with the system clock.
    pub fn new(store: S, cipher: CipherService, config: QueueConfig) -> Self {
        Self::with_clock(store, cipher, config, Arc::new(SystemClock))
    }

    /// Create a queue manager with an injected clock.
    pub fn with_clock(
        store: S,
        cipher: CipherService,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            cipher: Arc::new(cipher),
            clock,
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The device id stamped into idempotency keys.
    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Producer Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal a payload and insert it as a new `queued` item.
    ///
    /// Each call produces an independent row; semantically similar payloads
    /// are never merged. Uniqueness is at the id / idempotency-key level
    /// only. An empty payload is rejected before anything is sealed or
    /// persisted.
    pub async fn enqueue(&self, mode: Mode, plaintext: &[u8]) -> Result<ItemId> {
        if plaintext.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }

        let id = ItemId::generate();
        let idempotency_key = IdempotencyKey::generate(&self.config.device_id, &id);

        // The item id is the associated data: a ciphertext copied onto a
        // different row will not open.
        let ciphertext = self.cipher.seal(plaintext, id.to_string().as_bytes())?;

        let now = self.clock.now_ms();
        let item = QueueItem::new(
            id,
            idempotency_key,
            mode,
            self.cipher.key_id().to_string(),
            ciphertext,
            now,
        );
        self.store.insert_item(&item).await?;

        debug!(item = %id, mode = %mode, "enqueued");
        Ok(id)
    }

    /// Producer-facing wrapper: serialize a structured record and enqueue it.
    pub async fn submit(&self, mode: Mode, payload: &serde_json::Value) -> Result<ItemId> {
        let plaintext = serde_json::to_vec(payload)?;
        self.enqueue(mode, &plaintext).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Driver Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim up to `max_batch` eligible items and open their payloads.
    ///
    /// Claimed items are transitioned to `syncing` atomically with the
    /// selection, so concurrent callers can never hold the same item. An
    /// item whose ciphertext no longer opens is immediately parked in
    /// `failed` with reason [`DECRYPTION_FAILURE`] and excluded from the
    /// returned batch; this surfaces as a warning, never a crash.
    pub async fn dequeue_for_sync(&self, max_batch: usize) -> Result<Vec<DequeuedItem>> {
        let now = self.clock.now_ms();
        let claimed = self
            .store
            .claim_batch(max_batch, now, &self.config.backoff)
            .await?;

        let mut batch = Vec::with_capacity(claimed.len());
        for item in claimed {
            let aad = item.id.to_string();
            match self
                .cipher
                .open(&item.key_id, &item.ciphertext, aad.as_bytes())
            {
                Ok(plaintext) => batch.push(DequeuedItem {
                    id: item.id,
                    idempotency_key: item.idempotency_key,
                    mode: item.mode,
                    plaintext: Bytes::from(plaintext),
                    retry_count: item.retry_count,
                    created_at: item.created_at,
                }),
                Err(e) => {
                    warn!(item = %item.id, error = %e, "payload failed to open; parking item");
                    let at = self.clock.now_ms();
                    let attempt =
                        SyncAttempt::failure(item.id, at, DECRYPTION_FAILURE, None, None);
                    self.store
                        .mark_failed(&item.id, DECRYPTION_FAILURE, at, &attempt)
                        .await?;
                }
            }
        }
        Ok(batch)
    }

    /// Record a successful delivery.
    ///
    /// Only applies to an item currently `syncing`; anything else is a
    /// duplicate completion report and is ignored (returns `false`),
    /// mirroring the idempotency the remote side enforces.
    pub async fn mark_synced(
        &self,
        id: &ItemId,
        response_code: Option<u16>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        let now = self.clock.now_ms();
        let attempt = SyncAttempt::success(*id, now, response_code, duration_ms);
        let applied = self.store.mark_synced(id, now, &attempt).await?;
        if applied {
            debug!(item = %id, "synced");
        } else {
            debug!(item = %id, "ignoring duplicate completion report");
        }
        Ok(applied)
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `retry_count` and re-enters the item into the backoff
    /// cycle. Only applies to an item currently `syncing`.
    pub async fn mark_failed(
        &self,
        id: &ItemId,
        reason: &str,
        response_code: Option<u16>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        let now = self.clock.now_ms();
        let attempt = SyncAttempt::failure(*id, now, reason, response_code, duration_ms);
        let applied = self.store.mark_failed(id, reason, now, &attempt).await?;
        if applied {
            debug!(item = %id, reason, "delivery failed");
        }
        Ok(applied)
    }

    /// Reconcile items orphaned in `syncing` by a crash or cancellation.
    ///
    /// Run at process start and before each sync cycle. Recovered items
    /// re-enter the retry cycle as `failed` rather than being silently
    /// lost.
    pub async fn recover(&self) -> Result<Vec<ItemId>> {
        let now = self.clock.now_ms();
        let recovered = self
            .store
            .recover_stale(now, self.config.stale_syncing_ms)
            .await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered stale syncing items");
        }
        Ok(recovered)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only Status Interface
    // ─────────────────────────────────────────────────────────────────────────

    /// Aggregate item counts per status.
    pub async fn status_counts(&self) -> Result<BTreeMap<QueueStatus, u64>> {
        Ok(self.store.status_counts().await?)
    }

    /// List item metadata, newest first.
    pub async fn items(
        &self,
        status: Option<QueueStatus>,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        Ok(self.store.list_items(status, created_after, limit).await?)
    }

    /// Delivery attempt history for one item.
    pub async fn attempts(&self, id: &ItemId) -> Result<Vec<SyncAttempt>> {
        Ok(self.store.attempts_for(id).await?)
    }
}
