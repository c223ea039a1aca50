//! The background sync loop.
//!
//! One driver per device. Each cycle: recover stale claims, check
//! connectivity, claim a batch, deliver items one at a time, and report
//! every outcome back to the queue before the cycle ends. A cycle that
//! returns has nothing left in `syncing`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fieldnote_queue::QueueManager;
use fieldnote_store::QueueStore;

use crate::error::Result;
use crate::remote::{ConnectivityOracle, Delivery, RemoteDelivery};

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncDriverConfig {
    /// Idle time between cycles while the queue is moving.
    pub base_interval: Duration,
    /// Ceiling for the idle time while offline or drained.
    pub max_interval: Duration,
    /// Maximum items claimed per cycle.
    pub batch_size: usize,
}

impl Default for SyncDriverConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
            batch_size: 10,
        }
    }
}

/// What one cycle accomplished.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Stale `syncing` items reverted before the cycle proper.
    pub recovered: usize,
    /// Items accepted by the remote.
    pub delivered: usize,
    /// Items whose delivery failed and re-entered the retry cycle.
    pub failed: usize,
    /// The connectivity check said offline; nothing was claimed.
    pub skipped_offline: bool,
}

/// The sync driver.
pub struct SyncDriver<S: QueueStore> {
    queue: Arc<QueueManager<S>>,
    remote: Arc<dyn RemoteDelivery>,
    oracle: Arc<dyn ConnectivityOracle>,
    config: SyncDriverConfig,
}

impl<S: QueueStore> SyncDriver<S> {
    pub fn new(
        queue: Arc<QueueManager<S>>,
        remote: Arc<dyn RemoteDelivery>,
        oracle: Arc<dyn ConnectivityOracle>,
        config: SyncDriverConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            oracle,
            config,
        }
    }

    /// Run one full cycle: recover, probe, claim, deliver, report.
    ///
    /// Every claimed item is marked synced or failed before this returns,
    /// whatever the remote does.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        report.recovered = self.queue.recover().await?.len();

        if !self.oracle.is_reachable().await {
            debug!("remote unreachable, skipping cycle");
            report.skipped_offline = true;
            return Ok(report);
        }

        let batch = self.queue.dequeue_for_sync(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(count = batch.len(), "claimed batch");

        for item in batch {
            let delivery = Delivery {
                idempotency_key: item.idempotency_key.as_str().to_string(),
                device_id: self.queue.device_id().to_string(),
                mode: item.mode,
                payload: item.plaintext.clone(),
            };

            let started = Instant::now();
            match self.remote.deliver(&delivery).await {
                Ok(receipt) => {
                    let duration_ms = started.elapsed().as_millis() as i64;
                    self.queue
                        .mark_synced(&item.id, receipt.response_code, Some(duration_ms))
                        .await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    let duration_ms = started.elapsed().as_millis() as i64;
                    warn!(item = %item.id, error = %e, "delivery failed");
                    self.queue
                        .mark_failed(&item.id, &e.fail_reason(), e.response_code(), Some(duration_ms))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run cycles until told to stop.
    ///
    /// The idle interval resets to the base whenever a cycle delivers
    /// something and doubles toward the ceiling while offline or drained,
    /// so an offline clinic device does not hammer its radio. Cycle errors
    /// are logged and absorbed; the loop only exits via the shutdown
    /// channel.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut idle = self.config.base_interval;
        info!(interval_ms = idle.as_millis() as u64, "sync driver started");

        while !*shutdown.borrow() {
            match self.run_cycle().await {
                Ok(report) => {
                    if report.delivered > 0 {
                        idle = self.config.base_interval;
                    } else {
                        idle = (idle * 2).min(self.config.max_interval);
                    }
                    if report.delivered > 0 || report.failed > 0 || report.recovered > 0 {
                        info!(
                            delivered = report.delivered,
                            failed = report.failed,
                            recovered = report.recovered,
                            "sync cycle complete"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "sync cycle failed");
                    idle = (idle * 2).min(self.config.max_interval);
                }
            }

            if wait_for_shutdown(&mut shutdown, idle).await {
                break;
            }
        }

        info!("sync driver stopped");
    }
}

/// Sleep for `period`, waking early if the shutdown flag flips to true.
/// Returns true when shutdown was requested.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    let sleep = tokio::time::sleep(period);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MockOutcome, MockRemote, StaticOracle};
    use fieldnote_core::{BackoffPolicy, Clock, ManualClock, Mode, QueueStatus};
    use fieldnote_crypto::{CipherKey, CipherService};
    use fieldnote_queue::QueueConfig;
    use fieldnote_store::MemoryStore;

    struct Harness {
        driver: Arc<SyncDriver<MemoryStore>>,
        queue: Arc<QueueManager<MemoryStore>>,
        remote: Arc<MockRemote>,
        oracle: Arc<StaticOracle>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let config = QueueConfig {
            device_id: "clinic-1".to_string(),
            backoff: BackoffPolicy {
                base_ms: 1_000,
                cap_ms: 60_000,
                max_retries: 5,
            },
            stale_syncing_ms: 600_000,
        };
        let queue = Arc::new(QueueManager::with_clock(
            MemoryStore::new(),
            CipherService::new(CipherKey::from_bytes([9; 32])),
            config,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let remote = Arc::new(MockRemote::new());
        let oracle = Arc::new(StaticOracle::new(true));
        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&queue),
            Arc::clone(&remote) as Arc<dyn RemoteDelivery>,
            Arc::clone(&oracle) as Arc<dyn ConnectivityOracle>,
            SyncDriverConfig {
                batch_size: 10,
                ..SyncDriverConfig::default()
            },
        ));
        Harness {
            driver,
            queue,
            remote,
            oracle,
            clock,
        }
    }

    #[tokio::test]
    async fn test_cycle_delivers_whole_batch() {
        let h = harness();
        for i in 0..3 {
            h.queue
                .enqueue(Mode::Prod, format!("note {i}").as_bytes())
                .await
                .unwrap();
        }

        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(h.remote.record_count(), 3);

        let counts = h.queue.status_counts().await.unwrap();
        assert_eq!(counts.get(&QueueStatus::Synced), Some(&3));
    }

    #[tokio::test]
    async fn test_offline_cycle_claims_nothing() {
        let h = harness();
        h.queue.enqueue(Mode::Demo, b"note").await.unwrap();
        h.oracle.set_reachable(false);

        let report = h.driver.run_cycle().await.unwrap();
        assert!(report.skipped_offline);
        assert_eq!(h.remote.call_count(), 0);

        let counts = h.queue.status_counts().await.unwrap();
        assert_eq!(counts.get(&QueueStatus::Queued), Some(&1));
    }

    #[tokio::test]
    async fn test_failed_delivery_retries_after_backoff() {
        let h = harness();
        let id = h.queue.enqueue(Mode::Prod, b"note").await.unwrap();
        h.remote.script([MockOutcome::ConnectionError]);

        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);

        let item = h.queue.store().get_item(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.fail_reason.as_deref(), Some("connection_error"));
        assert_eq!(item.retry_count, 1);

        // Still inside the backoff window.
        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.delivered + report.failed, 0);

        h.clock.advance(2_000);
        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(h.queue.attempts(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_redelivery_is_idempotent() {
        let h = harness();
        let id = h.queue.enqueue(Mode::Prod, b"note").await.unwrap();
        h.remote.script([MockOutcome::ApplyThenTimeout]);

        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        let item = h.queue.store().get_item(&id).await.unwrap().unwrap();
        assert_eq!(item.fail_reason.as_deref(), Some("timeout"));

        h.clock.advance(2_000);
        let report = h.driver.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 1);

        // The remote applied the item once despite two delivery calls.
        assert_eq!(h.remote.call_count(), 2);
        assert_eq!(h.remote.record_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_delivery_records_status_code() {
        let h = harness();
        let id = h.queue.enqueue(Mode::Prod, b"note").await.unwrap();
        h.remote.script([MockOutcome::Reject { status: 422 }]);

        h.driver.run_cycle().await.unwrap();

        let item = h.queue.store().get_item(&id).await.unwrap().unwrap();
        assert_eq!(item.fail_reason.as_deref(), Some("http_422"));
        let attempts = h.queue.attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].response_code, Some(422));
        assert!(!attempts[0].success);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_idle_sleep() {
        let h = harness();
        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&h.queue),
            Arc::clone(&h.remote) as Arc<dyn RemoteDelivery>,
            Arc::clone(&h.oracle) as Arc<dyn ConnectivityOracle>,
            SyncDriverConfig {
                base_interval: Duration::from_secs(3600),
                max_interval: Duration::from_secs(3600),
                batch_size: 10,
            },
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver should stop promptly")
            .unwrap();
    }
}
