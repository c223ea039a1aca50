//! SQLite implementation of the QueueStore trait.
//!
//! This is the primary storage backend for the Fieldnote queue. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use fieldnote_core::{
    BackoffPolicy, IdempotencyKey, ItemId, Mode, QueueItem, QueueStatus, SyncAttempt,
    DECRYPTION_FAILURE, STALE_SYNCING,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::QueueStore;

use std::collections::BTreeMap;

/// SQLite-based queue store.
///
/// Thread-safe via internal Mutex; SQLite serializes writers anyway, so a
/// single connection behind a lock keeps transaction semantics simple.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates parent directories and runs migrations as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        debug!(path = %path.display(), "queue database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

const ITEM_COLUMNS: &str = "id, idempotency_key, mode, key_id, ciphertext, status, \
                            fail_reason, retry_count, created_at, updated_at";

// Helper to convert a row to QueueItem
fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let id_text: String = row.get("id")?;
    let mode_text: String = row.get("mode")?;
    let status_text: String = row.get("status")?;

    let id = ItemId::from_str(&id_text).map_err(|e| text_conversion_error(0, e))?;
    let mode = Mode::from_str(&mode_text).map_err(|e| text_conversion_error(2, e))?;
    let status = QueueStatus::from_str(&status_text).map_err(|e| text_conversion_error(5, e))?;

    Ok(QueueItem {
        id,
        idempotency_key: IdempotencyKey::from_string(row.get("idempotency_key")?),
        mode,
        key_id: row.get("key_id")?,
        ciphertext: row.get("ciphertext")?,
        status,
        fail_reason: row.get("fail_reason")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncAttempt> {
    let id_text: String = row.get("item_id")?;
    let item_id = ItemId::from_str(&id_text).map_err(|e| text_conversion_error(0, e))?;

    Ok(SyncAttempt {
        item_id,
        attempted_at: row.get("attempted_at")?,
        success: row.get::<_, i64>("success")? != 0,
        response_code: row.get::<_, Option<i64>>("response_code")?.map(|v| v as u16),
        error_message: row.get("error_message")?,
        duration_ms: row.get("duration_ms")?,
    })
}

fn text_conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn insert_attempt(conn: &Connection, attempt: &SyncAttempt) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sync_attempts
            (item_id, attempted_at, success, response_code, error_message, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            attempt.item_id.to_string(),
            attempt.attempted_at,
            attempt.success as i64,
            attempt.response_code.map(|c| c as i64),
            attempt.error_message,
            attempt.duration_ms,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn insert_item(&self, item: &QueueItem) -> Result<()> {
        let item = item.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO queue_items
                    (id, idempotency_key, mode, key_id, ciphertext, status,
                     fail_reason, retry_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    item.id.to_string(),
                    item.idempotency_key.as_str(),
                    item.mode.as_str(),
                    item.key_id,
                    item.ciphertext,
                    item.status.as_str(),
                    item.fail_reason,
                    item.retry_count as i64,
                    item.created_at,
                    item.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<QueueItem>> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1"),
                params![id],
                row_to_item,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn claim_batch(
        &self,
        max_batch: usize,
        now_ms: i64,
        policy: &BackoffPolicy,
    ) -> Result<Vec<QueueItem>> {
        let policy = policy.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            // Candidates oldest-first; the id tie-break keeps ordering
            // deterministic when concurrent enqueues share a millisecond.
            // Permanently parked rows (retry ceiling, unopenable ciphertext)
            // are pruned here so the scan does not drag their blobs along;
            // `policy.eligible` below remains the authority on timing.
            let candidates = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM queue_items
                     WHERE status = 'queued'
                        OR (status = 'failed' AND retry_count < ?1
                            AND (fail_reason IS NULL OR fail_reason <> ?2))
                     ORDER BY created_at ASC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(
                        params![policy.max_retries as i64, DECRYPTION_FAILURE],
                        row_to_item,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut claimed = Vec::new();
            for mut item in candidates {
                if claimed.len() >= max_batch {
                    break;
                }
                if !policy.eligible(&item, now_ms) {
                    continue;
                }

                let changed = tx.execute(
                    "UPDATE queue_items SET status = 'syncing', updated_at = ?2
                     WHERE id = ?1 AND status IN ('queued', 'failed')",
                    params![item.id.to_string(), now_ms],
                )?;
                if changed == 0 {
                    continue;
                }
                item.status = QueueStatus::Syncing;
                item.updated_at = now_ms;
                claimed.push(item);
            }

            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn mark_synced(&self, id: &ItemId, now_ms: i64, attempt: &SyncAttempt) -> Result<bool> {
        let id = id.to_string();
        let attempt = attempt.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE queue_items SET status = 'synced', updated_at = ?2
                 WHERE id = ?1 AND status = 'syncing'",
                params![id, now_ms],
            )?;
            if changed == 0 {
                // Duplicate completion report; nothing to write.
                return Ok(false);
            }

            insert_attempt(&tx, &attempt)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &ItemId,
        reason: &str,
        now_ms: i64,
        attempt: &SyncAttempt,
    ) -> Result<bool> {
        let id = id.to_string();
        let reason = reason.to_string();
        let attempt = attempt.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE queue_items
                 SET status = 'failed', fail_reason = ?2,
                     retry_count = retry_count + 1, updated_at = ?3
                 WHERE id = ?1 AND status = 'syncing'",
                params![id, reason, now_ms],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            insert_attempt(&tx, &attempt)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn recover_stale(&self, now_ms: i64, staleness_ms: i64) -> Result<Vec<ItemId>> {
        let cutoff = now_ms.saturating_sub(staleness_ms);
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let stale: Vec<ItemId> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM queue_items
                     WHERE status = 'syncing' AND updated_at <= ?1",
                )?;
                let ids = stmt
                    .query_map(params![cutoff], |row| {
                        let id_text: String = row.get(0)?;
                        ItemId::from_str(&id_text).map_err(|e| text_conversion_error(0, e))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            for id in &stale {
                tx.execute(
                    "UPDATE queue_items
                     SET status = 'failed', fail_reason = ?2,
                         retry_count = retry_count + 1, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), STALE_SYNCING, now_ms],
                )?;
                insert_attempt(
                    &tx,
                    &SyncAttempt::failure(*id, now_ms, STALE_SYNCING, None, None),
                )?;
            }

            tx.commit()?;
            Ok(stale)
        })
        .await
    }

    async fn status_counts(&self) -> Result<BTreeMap<QueueStatus, u64>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| {
                    let status_text: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    let status = QueueStatus::from_str(&status_text)
                        .map_err(|e| text_conversion_error(0, e))?;
                    Ok((status, count as u64))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_items(
        &self,
        status: Option<QueueStatus>,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM queue_items
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR created_at > ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            ))?;
            let items = stmt
                .query_map(
                    params![status.map(|s| s.as_str()), created_after, limit as i64],
                    row_to_item,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    async fn attempts_for(&self, id: &ItemId) -> Result<Vec<SyncAttempt>> {
        let id = id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, attempted_at, success, response_code, error_message, duration_ms
                 FROM sync_attempts WHERE item_id = ?1 ORDER BY attempt_id",
            )?;
            let attempts = stmt
                .query_map(params![id], row_to_attempt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(attempts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(created_at: i64) -> QueueItem {
        let id = ItemId::generate();
        QueueItem::new(
            id,
            IdempotencyKey::generate("dev", &id),
            Mode::Demo,
            "k1".into(),
            vec![0xDE, 0xAD, 0xBE, 0xEF],
            created_at,
        )
    }

    fn lenient_policy() -> BackoffPolicy {
        BackoffPolicy {
            base_ms: 0,
            cap_ms: 0,
            max_retries: 5,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_item() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);

        store.insert_item(&item).await.unwrap();

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded, item);
    }

    #[tokio::test]
    async fn test_get_missing_item() {
        let store = SqliteStore::open_memory().unwrap();
        let missing = store.get_item(&ItemId::generate()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);

        store.insert_item(&item).await.unwrap();
        assert!(store.insert_item(&item).await.is_err());
    }

    #[tokio::test]
    async fn test_claim_transitions_to_syncing_fifo() {
        let store = SqliteStore::open_memory().unwrap();
        let older = make_item(100);
        let newer = make_item(200);
        store.insert_item(&newer).await.unwrap();
        store.insert_item(&older).await.unwrap();

        let claimed = store
            .claim_batch(1, 1_000, &lenient_policy())
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, older.id);
        assert_eq!(claimed[0].status, QueueStatus::Syncing);

        // The claimed item is no longer offered; the newer one is next.
        let claimed = store
            .claim_batch(10, 1_000, &lenient_policy())
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, newer.id);

        // Everything is syncing now.
        let claimed = store
            .claim_batch(10, 1_000, &lenient_policy())
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_backoff() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);
        store.insert_item(&item).await.unwrap();

        let policy = BackoffPolicy {
            base_ms: 1_000,
            cap_ms: 60_000,
            max_retries: 5,
        };

        let claimed = store.claim_batch(10, 500, &policy).await.unwrap();
        assert_eq!(claimed.len(), 1);

        store
            .mark_failed(
                &item.id,
                "timeout",
                500,
                &SyncAttempt::failure(item.id, 500, "timeout", None, Some(10)),
            )
            .await
            .unwrap();

        // retry_count is now 1, so the next window opens at 500 + 2000.
        assert!(store.claim_batch(10, 2_000, &policy).await.unwrap().is_empty());
        let claimed = store.claim_batch(10, 2_500, &policy).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_mark_synced_appends_attempt() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);
        store.insert_item(&item).await.unwrap();
        store.claim_batch(1, 200, &lenient_policy()).await.unwrap();

        let attempt = SyncAttempt::success(item.id, 300, Some(200), Some(42));
        let applied = store.mark_synced(&item.id, 300, &attempt).await.unwrap();
        assert!(applied);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueueStatus::Synced);
        assert_eq!(loaded.updated_at, 300);
        assert_eq!(loaded.retry_count, 0);

        let attempts = store.attempts_for(&item.id).await.unwrap();
        assert_eq!(attempts, vec![attempt]);
    }

    #[tokio::test]
    async fn test_mark_synced_noop_when_not_syncing() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);
        store.insert_item(&item).await.unwrap();

        // Still queued: a completion report must be ignored.
        let attempt = SyncAttempt::success(item.id, 300, Some(200), None);
        let applied = store.mark_synced(&item.id, 300, &attempt).await.unwrap();
        assert!(!applied);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueueStatus::Queued);
        assert!(store.attempts_for(&item.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_failed_increments_retry_count() {
        let store = SqliteStore::open_memory().unwrap();
        let item = make_item(100);
        store.insert_item(&item).await.unwrap();
        store.claim_batch(1, 200, &lenient_policy()).await.unwrap();

        let attempt = SyncAttempt::failure(item.id, 300, "503 from remote", Some(503), Some(88));
        let applied = store
            .mark_failed(&item.id, "503 from remote", 300, &attempt)
            .await
            .unwrap();
        assert!(applied);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueueStatus::Failed);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.fail_reason.as_deref(), Some("503 from remote"));
    }

    #[tokio::test]
    async fn test_recover_stale_reverts_to_failed() {
        let store = SqliteStore::open_memory().unwrap();
        let stuck = make_item(100);
        let fresh = make_item(100);
        store.insert_item(&stuck).await.unwrap();
        store.insert_item(&fresh).await.unwrap();

        store.claim_batch(10, 1_000, &lenient_policy()).await.unwrap();

        // Re-claim timestamps: stuck at t=1000, fresh bumped to t=5000.
        store
            .mark_failed(
                &fresh.id,
                "x",
                4_999,
                &SyncAttempt::failure(fresh.id, 4_999, "x", None, None),
            )
            .await
            .unwrap();
        store.claim_batch(10, 5_000, &lenient_policy()).await.unwrap();

        let recovered = store.recover_stale(6_000, 2_000).await.unwrap();
        assert_eq!(recovered, vec![stuck.id]);

        let loaded = store.get_item(&stuck.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueueStatus::Failed);
        assert_eq!(loaded.fail_reason.as_deref(), Some(STALE_SYNCING));
        assert_eq!(loaded.retry_count, 1);

        let attempts = store.attempts_for(&stuck.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);

        // The fresh claim was left alone.
        let loaded = store.get_item(&fresh.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueueStatus::Syncing);
    }

    #[tokio::test]
    async fn test_status_counts_and_listing() {
        let store = SqliteStore::open_memory().unwrap();
        for t in [100, 200, 300] {
            store.insert_item(&make_item(t)).await.unwrap();
        }
        let claimed = store.claim_batch(1, 400, &lenient_policy()).await.unwrap();
        store
            .mark_synced(
                &claimed[0].id,
                500,
                &SyncAttempt::success(claimed[0].id, 500, Some(200), None),
            )
            .await
            .unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.get(&QueueStatus::Queued), Some(&2));
        assert_eq!(counts.get(&QueueStatus::Synced), Some(&1));

        let queued = store
            .list_items(Some(QueueStatus::Queued), None, 10)
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
        // Newest first.
        assert!(queued[0].created_at > queued[1].created_at);

        let recent = store.list_items(None, Some(150), 10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let capped = store.list_items(None, None, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_skips_permanently_parked_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let policy = lenient_policy();

        let unopenable = make_item(100);
        let exhausted = make_item(200);
        store.insert_item(&unopenable).await.unwrap();
        store.insert_item(&exhausted).await.unwrap();

        // Park the first as never-retryable.
        store.claim_batch(1, 1_000, &policy).await.unwrap();
        store
            .mark_failed(
                &unopenable.id,
                DECRYPTION_FAILURE,
                1_000,
                &SyncAttempt::failure(unopenable.id, 1_000, DECRYPTION_FAILURE, None, None),
            )
            .await
            .unwrap();

        // Burn the second through the retry ceiling.
        for round in 0..policy.max_retries {
            let claimed = store.claim_batch(10, 2_000, &policy).await.unwrap();
            assert_eq!(claimed.len(), 1, "round {round}");
            assert_eq!(claimed[0].id, exhausted.id);
            store
                .mark_failed(
                    &exhausted.id,
                    "timeout",
                    2_000,
                    &SyncAttempt::failure(exhausted.id, 2_000, "timeout", None, None),
                )
                .await
                .unwrap();
        }

        // Both rows are parked; nothing is offered again.
        let claimed = store.claim_batch(10, i64::MAX, &policy).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("queue.db");

        let item = make_item(100);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_item(&item).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded, item);
    }
}
