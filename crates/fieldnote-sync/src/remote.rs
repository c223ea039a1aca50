//! Remote delivery abstraction for the sync driver.
//!
//! The delivery layer hands one opened item at a time to the remote
//! ingestion endpoint. Implementations may use HTTP or anything else; the
//! driver only cares that repeated deliveries carrying the same
//! idempotency key collapse into a single remote effect.

use async_trait::async_trait;
use bytes::Bytes;

use fieldnote_core::Mode;

use crate::error::Result;

/// One item's worth of data handed to the remote side.
///
/// Carries the opened payload; sealing and opening never cross this
/// boundary.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub idempotency_key: String,
    pub device_id: String,
    pub mode: Mode,
    pub payload: Bytes,
}

/// What the remote reported for an accepted delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReceipt {
    pub response_code: Option<u16>,
}

/// Trait for delivering items to the remote ingestion endpoint.
///
/// Implementations must be thread-safe (Send + Sync). The contract is
/// at-least-once: the driver may re-deliver after a timeout even though
/// the remote already applied the item, and the remote deduplicates on
/// the idempotency key.
#[async_trait]
pub trait RemoteDelivery: Send + Sync {
    /// Deliver a single item. `Ok` means the remote accepted it.
    async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt>;
}

/// Trait answering "is the remote worth talking to right now".
///
/// Consulted once per cycle before anything is claimed, so an offline
/// device never moves items into `syncing` just to fail them.
#[async_trait]
pub trait ConnectivityOracle: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// In-memory implementations for testing.
///
/// [`memory::MockRemote`] models a deduplicating remote with scriptable
/// failures; [`memory::StaticOracle`] is a toggle.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::error::SyncError;

    /// Scripted outcome for one delivery call.
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        /// Apply the item and return success.
        Success,
        /// Refuse with an HTTP status; nothing is applied.
        Reject { status: u16 },
        /// Drop the request; nothing is applied.
        ConnectionError,
        /// Apply the item but time out before answering. This is the
        /// interesting case for idempotency: the caller sees a failure
        /// while the remote effect already happened.
        ApplyThenTimeout,
    }

    /// A mock ingestion endpoint.
    ///
    /// Deduplicates on idempotency key the way the real remote does:
    /// re-delivering an already-applied key succeeds without creating a
    /// second record.
    #[derive(Default)]
    pub struct MockRemote {
        inner: Mutex<MockRemoteInner>,
    }

    #[derive(Default)]
    struct MockRemoteInner {
        /// Outcomes consumed front to back; empty means Success.
        script: Vec<MockOutcome>,
        /// Keys the remote has applied, each exactly once.
        applied: HashSet<String>,
        /// Every delivery call observed, applied or not.
        calls: Vec<String>,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue outcomes for upcoming delivery calls.
        pub fn script(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
            let mut inner = self.inner.lock().unwrap();
            inner.script.extend(outcomes);
        }

        /// Number of distinct records the remote holds.
        pub fn record_count(&self) -> usize {
            self.inner.lock().unwrap().applied.len()
        }

        /// Whether a key has been applied.
        pub fn has_record(&self, idempotency_key: &str) -> bool {
            self.inner.lock().unwrap().applied.contains(idempotency_key)
        }

        /// Total delivery calls observed, including failed ones.
        pub fn call_count(&self) -> usize {
            self.inner.lock().unwrap().calls.len()
        }
    }

    #[async_trait]
    impl RemoteDelivery for MockRemote {
        async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt> {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(delivery.idempotency_key.clone());

            let outcome = if inner.script.is_empty() {
                MockOutcome::Success
            } else {
                inner.script.remove(0)
            };

            match outcome {
                MockOutcome::Success => {
                    inner.applied.insert(delivery.idempotency_key.clone());
                    Ok(DeliveryReceipt {
                        response_code: Some(200),
                    })
                }
                MockOutcome::Reject { status } => Err(SyncError::Rejected { status }),
                MockOutcome::ConnectionError => {
                    Err(SyncError::Transport("connection refused".into()))
                }
                MockOutcome::ApplyThenTimeout => {
                    inner.applied.insert(delivery.idempotency_key.clone());
                    Err(SyncError::Timeout)
                }
            }
        }
    }

    /// Connectivity oracle with a settable answer.
    pub struct StaticOracle {
        reachable: AtomicBool,
    }

    impl StaticOracle {
        pub fn new(reachable: bool) -> Self {
            Self {
                reachable: AtomicBool::new(reachable),
            }
        }

        pub fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ConnectivityOracle for StaticOracle {
        async fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }
    }
}
