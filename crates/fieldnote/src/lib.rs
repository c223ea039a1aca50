//! # Fieldnote
//!
//! The unified API for Fieldnote - offline-first, encrypted-at-rest
//! queueing and idempotent sync for clinical notes captured at the edge.
//!
//! ## Overview
//!
//! Fieldnote provides a portable, offline-first library for:
//!
//! - **Durable capture**: Payloads are AEAD-sealed before they touch
//!   storage and survive restarts in SQLite
//! - **A strict delivery state machine**: `queued -> syncing ->
//!   synced | failed`, with `failed` feeding back into retry
//! - **Idempotent sync**: Every item carries an idempotency key; the
//!   remote collapses duplicate deliveries, so at-least-once delivery
//!   is safe
//! - **Crash recovery**: Items orphaned in `syncing` are reclaimed, not
//!   lost
//!
//! ## Key Concepts
//!
//! - **Queue item**: Immutable ciphertext plus mutable delivery state.
//! - **Idempotency key**: Minted once at enqueue, never regenerated.
//! - **Backoff**: Failed items wait out `base * 2^retries` before the
//!   next claim, up to a retry ceiling.
//! - **Connectivity oracle**: Consulted before each cycle so offline
//!   devices never churn.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldnote::{Fieldnote, FieldnoteConfig, Mode};
//!
//! async fn example() {
//!     let config = FieldnoteConfig::new("/var/lib/fieldnote", "clinic-7");
//!     let app = Fieldnote::open(config).unwrap();
//!
//!     // Reclaim anything a previous process left mid-flight.
//!     app.recover().await.unwrap();
//!
//!     // Capture a note; it is sealed before it is stored.
//!     let payload = serde_json::json!({ "chief_complaint": "fever" });
//!     let item_id = app.submit(Mode::Prod, &payload).await.unwrap();
//!
//!     // Ship in the background whenever the uplink allows.
//!     let sync = app.start_sync("https://sync.example.org").unwrap();
//!
//!     let _ = (item_id, sync);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `fieldnote::core` - Core primitives (ItemId, QueueStatus, BackoffPolicy)
//! - `fieldnote::crypto` - AEAD cipher service and keystore
//! - `fieldnote::store` - Storage abstraction, SQLite and in-memory
//! - `fieldnote::queue` - The queue manager
//! - `fieldnote::sync` - Remote delivery and the background loop

pub mod config;
pub mod error;
pub mod service;

// Re-export component crates
pub use fieldnote_core as core;
pub use fieldnote_crypto as crypto;
pub use fieldnote_queue as queue;
pub use fieldnote_store as store;
pub use fieldnote_sync as sync;

// Re-export main types for convenience
pub use config::FieldnoteConfig;
pub use error::{FieldnoteError, Result};
pub use service::{Fieldnote, SyncHandle};

// Re-export commonly used core types
pub use fieldnote_core::{
    BackoffPolicy, IdempotencyKey, ItemId, Mode, QueueItem, QueueStatus, SyncAttempt,
};
