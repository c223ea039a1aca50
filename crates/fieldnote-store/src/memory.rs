//! In-memory implementation of the QueueStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use fieldnote_core::{
    BackoffPolicy, ItemId, QueueItem, QueueStatus, SyncAttempt, STALE_SYNCING,
};

use crate::error::{Result, StoreError};
use crate::traits::QueueStore;

/// In-memory queue store.
///
/// All data is lost when the store is dropped. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    items: HashMap<ItemId, QueueItem>,
    attempts: HashMap<ItemId, Vec<SyncAttempt>>,
    idempotency_keys: HashSet<String>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStoreInner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_item(&self, item: &QueueItem) -> Result<()> {
        let mut inner = self.lock()?;

        if inner.items.contains_key(&item.id) {
            return Err(StoreError::InvalidData(format!(
                "duplicate item id: {}",
                item.id
            )));
        }
        if !inner
            .idempotency_keys
            .insert(item.idempotency_key.as_str().to_string())
        {
            return Err(StoreError::InvalidData(format!(
                "duplicate idempotency key: {}",
                item.idempotency_key
            )));
        }

        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<QueueItem>> {
        let inner = self.lock()?;
        Ok(inner.items.get(id).cloned())
    }

    async fn claim_batch(
        &self,
        max_batch: usize,
        now_ms: i64,
        policy: &BackoffPolicy,
    ) -> Result<Vec<QueueItem>> {
        let mut inner = self.lock()?;

        let mut eligible: Vec<ItemId> = inner
            .items
            .values()
            .filter(|item| policy.eligible(item, now_ms))
            .map(|item| item.id)
            .collect();
        eligible.sort_by_key(|id| {
            let item = &inner.items[id];
            (item.created_at, item.id)
        });

        let mut claimed = Vec::new();
        for id in eligible.into_iter().take(max_batch) {
            let item = inner.items.get_mut(&id).expect("id from scan");
            item.status = QueueStatus::Syncing;
            item.updated_at = now_ms;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn mark_synced(&self, id: &ItemId, now_ms: i64, attempt: &SyncAttempt) -> Result<bool> {
        let mut inner = self.lock()?;

        let Some(item) = inner.items.get_mut(id) else {
            return Ok(false);
        };
        if item.status != QueueStatus::Syncing {
            return Ok(false);
        }

        item.status = QueueStatus::Synced;
        item.updated_at = now_ms;
        inner.attempts.entry(*id).or_default().push(attempt.clone());
        Ok(true)
    }

    async fn mark_failed(
        &self,
        id: &ItemId,
        reason: &str,
        now_ms: i64,
        attempt: &SyncAttempt,
    ) -> Result<bool> {
        let mut inner = self.lock()?;

        let Some(item) = inner.items.get_mut(id) else {
            return Ok(false);
        };
        if item.status != QueueStatus::Syncing {
            return Ok(false);
        }

        item.status = QueueStatus::Failed;
        item.fail_reason = Some(reason.to_string());
        item.retry_count += 1;
        item.updated_at = now_ms;
        inner.attempts.entry(*id).or_default().push(attempt.clone());
        Ok(true)
    }

    async fn recover_stale(&self, now_ms: i64, staleness_ms: i64) -> Result<Vec<ItemId>> {
        let mut inner = self.lock()?;
        let cutoff = now_ms.saturating_sub(staleness_ms);

        let mut stale: Vec<ItemId> = inner
            .items
            .values()
            .filter(|item| item.status == QueueStatus::Syncing && item.updated_at <= cutoff)
            .map(|item| item.id)
            .collect();
        stale.sort();

        for id in &stale {
            let item = inner.items.get_mut(id).expect("id from scan");
            item.status = QueueStatus::Failed;
            item.fail_reason = Some(STALE_SYNCING.to_string());
            item.retry_count += 1;
            item.updated_at = now_ms;
            inner
                .attempts
                .entry(*id)
                .or_default()
                .push(SyncAttempt::failure(*id, now_ms, STALE_SYNCING, None, None));
        }

        Ok(stale)
    }

    async fn status_counts(&self) -> Result<BTreeMap<QueueStatus, u64>> {
        let inner = self.lock()?;
        let mut counts = BTreeMap::new();
        for item in inner.items.values() {
            *counts.entry(item.status).or_insert(0u64) += 1;
        }
        Ok(counts)
    }

    async fn list_items(
        &self,
        status: Option<QueueStatus>,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let inner = self.lock()?;

        let mut items: Vec<QueueItem> = inner
            .items
            .values()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .filter(|item| created_after.map_or(true, |t| item.created_at > t))
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn attempts_for(&self, id: &ItemId) -> Result<Vec<SyncAttempt>> {
        let inner = self.lock()?;
        Ok(inner.attempts.get(id).cloned().unwrap_or_default())
    }
}
