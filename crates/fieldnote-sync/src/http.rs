//! HTTP implementations of the delivery and connectivity traits.
//!
//! The remote contract is a single ingestion endpoint, `POST /v1/sync`,
//! idempotent on the delivery's idempotency key, plus a cheap liveness
//! probe at `GET /v1/health`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::remote::{ConnectivityOracle, Delivery, DeliveryReceipt, RemoteDelivery};

/// Wire body for `POST /v1/sync`.
#[derive(Serialize)]
struct SyncRequest<'a> {
    idempotency_key: &'a str,
    device_id: &'a str,
    mode: &'a str,
    payload: serde_json::Value,
}

fn map_send_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Transport(e.to_string())
    }
}

/// Delivery over HTTP.
pub struct HttpRemote {
    client: reqwest::Client,
    sync_url: String,
}

impl HttpRemote {
    /// Build a client with a per-request timeout baked in.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            sync_url: format!("{}/v1/sync", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RemoteDelivery for HttpRemote {
    async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt> {
        // Payloads are JSON in practice; anything else travels as a JSON
        // string so the body stays well-formed.
        let payload: serde_json::Value = serde_json::from_slice(&delivery.payload)
            .unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&delivery.payload).into_owned())
            });

        let body = SyncRequest {
            idempotency_key: &delivery.idempotency_key,
            device_id: &delivery.device_id,
            mode: delivery.mode.as_str(),
            payload,
        };

        let response = self
            .client
            .post(&self.sync_url)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(DeliveryReceipt {
                response_code: Some(status.as_u16()),
            })
        } else {
            Err(SyncError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Connectivity oracle backed by the health endpoint.
///
/// Any answer at all from `GET /v1/health` with a success status counts
/// as reachable; everything else, including a timeout, counts as offline.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    health_url: String,
}

impl HttpHealthProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            health_url: format!("{}/v1/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ConnectivityOracle for HttpHealthProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        }
    }
}
