//! Configuration for a Fieldnote instance.

use std::path::PathBuf;
use std::time::Duration;

use fieldnote_core::BackoffPolicy;
use fieldnote_sync::SyncDriverConfig;

/// Configuration for the Fieldnote facade.
///
/// One instance per device. The device id ends up in every idempotency
/// key, so it should be stable across restarts.
#[derive(Debug, Clone)]
pub struct FieldnoteConfig {
    /// Queue database location.
    pub db_path: PathBuf,
    /// Keyset file location; created on first open.
    pub keystore_path: PathBuf,
    /// Stable identifier for this device.
    pub device_id: String,
    /// Retry scheduling for failed items.
    pub backoff: BackoffPolicy,
    /// Staleness threshold for the `syncing` recovery pass.
    pub stale_syncing_ms: i64,
    /// Background loop behavior.
    pub sync: SyncDriverConfig,
    /// Per-request timeout for remote calls and health probes.
    pub request_timeout: Duration,
}

impl FieldnoteConfig {
    /// Standard layout under a data directory: `fieldnote.db` for the
    /// queue, `keyset.json` for the cipher key.
    pub fn new(data_dir: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join("fieldnote.db"),
            keystore_path: data_dir.join("keyset.json"),
            device_id: device_id.into(),
            backoff: BackoffPolicy::default(),
            stale_syncing_ms: 600_000,
            sync: SyncDriverConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}
