//! # Fieldnote Sync
//!
//! The sync driver: moves sealed items off the device when connectivity
//! allows.
//!
//! The driver claims batches from the queue manager, delivers one item
//! per remote call with its idempotency key, and reports each outcome
//! back before the cycle ends. Delivery is at-least-once; the remote
//! deduplicates on the idempotency key, so a retry after a timed-out
//! call is safe. Connectivity is consulted up front each cycle so an
//! offline device never churns items through `syncing`.

pub mod driver;
pub mod error;
pub mod http;
pub mod remote;

pub use driver::{CycleReport, SyncDriver, SyncDriverConfig};
pub use error::{Result, SyncError};
pub use http::{HttpHealthProbe, HttpRemote};
pub use remote::{ConnectivityOracle, Delivery, DeliveryReceipt, RemoteDelivery};
