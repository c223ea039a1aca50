//! # Fieldnote Store
//!
//! Durable persistence for the queue: one row per [`fieldnote_core::QueueItem`]
//! plus an append-only history of delivery attempts.
//!
//! The [`QueueStore`] trait is the abstract interface; [`SqliteStore`] is the
//! primary backend and [`MemoryStore`] mirrors its semantics for tests.
//! Every multi-row mutation ("mark synced and append attempt") runs in a
//! single transaction, so a crash mid-write leaves either the old or the new
//! consistent state, never a partial one.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::QueueStore;
