//! The Fieldnote service: wiring and lifecycle.
//!
//! Brings the keystore, storage, queue manager, and sync driver together
//! behind one handle, the way an application embeds the system.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use fieldnote_core::{ItemId, Mode, QueueItem, QueueStatus, SyncAttempt};
use fieldnote_crypto::CipherService;
use fieldnote_queue::{QueueConfig, QueueManager};
use fieldnote_store::SqliteStore;
use fieldnote_sync::{
    ConnectivityOracle, CycleReport, HttpHealthProbe, HttpRemote, RemoteDelivery, SyncDriver,
};

use crate::config::FieldnoteConfig;
use crate::error::Result;

/// Handle for a running background sync loop.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown)
/// leaves the loop running until the runtime goes away; the recovery
/// pass covers anything that was mid-flight.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop to stop and wait for it to finish its cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// The main Fieldnote handle.
///
/// Owns the queue manager over on-disk storage. Producers submit through
/// it; the sync driver runs against the same queue, either as a spawned
/// loop ([`start_sync`](Self::start_sync)) or one cycle at a time
/// ([`sync_once`](Self::sync_once)).
pub struct Fieldnote {
    queue: Arc<QueueManager<SqliteStore>>,
    config: FieldnoteConfig,
}

impl Fieldnote {
    /// Open (or create) the keystore and queue database.
    ///
    /// Does not touch the network and does not start the sync loop. Call
    /// [`recover`](Self::recover) after opening to reclaim anything a
    /// previous process left in `syncing`.
    pub fn open(config: FieldnoteConfig) -> Result<Self> {
        let key = fieldnote_crypto::load_or_create(&config.keystore_path)?;
        let cipher = CipherService::new(key);
        let store = SqliteStore::open(&config.db_path)?;

        let queue = QueueManager::new(
            store,
            cipher,
            QueueConfig {
                device_id: config.device_id.clone(),
                backoff: config.backoff.clone(),
                stale_syncing_ms: config.stale_syncing_ms,
            },
        );

        info!(device = %config.device_id, db = %config.db_path.display(), "opened");
        Ok(Self {
            queue: Arc::new(queue),
            config,
        })
    }

    /// Get the queue manager.
    pub fn queue(&self) -> &Arc<QueueManager<SqliteStore>> {
        &self.queue
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Producer Interface
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal and enqueue a structured record.
    pub async fn submit(&self, mode: Mode, payload: &serde_json::Value) -> Result<ItemId> {
        Ok(self.queue.submit(mode, payload).await?)
    }

    /// Seal and enqueue a raw payload.
    pub async fn enqueue(&self, mode: Mode, plaintext: &[u8]) -> Result<ItemId> {
        Ok(self.queue.enqueue(mode, plaintext).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Reclaim items a crashed or killed process left in `syncing`.
    pub async fn recover(&self) -> Result<Vec<ItemId>> {
        Ok(self.queue.recover().await?)
    }

    /// Start the background sync loop against an HTTP remote.
    pub fn start_sync(&self, remote_url: &str) -> Result<SyncHandle> {
        let remote = HttpRemote::new(remote_url, self.config.request_timeout)?;
        let oracle = HttpHealthProbe::new(remote_url, self.config.request_timeout)?;
        Ok(self.start_sync_with(Arc::new(remote), Arc::new(oracle)))
    }

    /// Start the background sync loop with explicit delivery and
    /// connectivity implementations.
    pub fn start_sync_with(
        &self,
        remote: Arc<dyn RemoteDelivery>,
        oracle: Arc<dyn ConnectivityOracle>,
    ) -> SyncHandle {
        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&self.queue),
            remote,
            oracle,
            self.config.sync.clone(),
        ));
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(driver.run(rx));
        SyncHandle { shutdown, task }
    }

    /// Run a single sync cycle, for manual flushes and tests.
    pub async fn sync_once(
        &self,
        remote: Arc<dyn RemoteDelivery>,
        oracle: Arc<dyn ConnectivityOracle>,
    ) -> Result<CycleReport> {
        let driver = SyncDriver::new(
            Arc::clone(&self.queue),
            remote,
            oracle,
            self.config.sync.clone(),
        );
        Ok(driver.run_cycle().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only Status Interface
    // ─────────────────────────────────────────────────────────────────────────

    /// Item counts per status, for dashboards.
    pub async fn status_counts(&self) -> Result<BTreeMap<QueueStatus, u64>> {
        Ok(self.queue.status_counts().await?)
    }

    /// Item metadata listing, newest first.
    pub async fn items(
        &self,
        status: Option<QueueStatus>,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        Ok(self.queue.items(status, created_after, limit).await?)
    }

    /// Delivery attempt history for one item.
    pub async fn attempts(&self, id: &ItemId) -> Result<Vec<SyncAttempt>> {
        Ok(self.queue.attempts(id).await?)
    }
}
