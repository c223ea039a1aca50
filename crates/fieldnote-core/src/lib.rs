//! # Fieldnote Core
//!
//! Pure primitives for the Fieldnote queue: items, attempts, the delivery
//! state machine, and the retry backoff policy.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over queue data structures, so every policy decision
//! (transition legality, retry eligibility) is testable without a database
//! or a real clock.
//!
//! ## Key Types
//!
//! - [`QueueItem`] - One structured record pending or completed delivery
//! - [`SyncAttempt`] - Immutable audit record of one delivery attempt
//! - [`QueueStatus`] - The per-item delivery state machine
//! - [`BackoffPolicy`] - Pure retry scheduling: `(retry_count, now) -> eligible?`
//! - [`Clock`] - Injected time source, with a manual implementation for tests

pub mod backoff;
pub mod clock;
pub mod error;
pub mod item;
pub mod types;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ValidationError;
pub use item::{Mode, QueueItem, QueueStatus, SyncAttempt, DECRYPTION_FAILURE, STALE_SYNCING};
pub use types::{IdempotencyKey, ItemId};
