//! # Fieldnote Queue
//!
//! The queue manager: the single component allowed to mutate queue items.
//!
//! Producers call [`QueueManager::enqueue`] (payload is sealed before it
//! touches storage); the sync driver calls
//! [`QueueManager::dequeue_for_sync`] and reports outcomes back through
//! [`QueueManager::mark_synced`] / [`QueueManager::mark_failed`]. Every
//! transition is a single store transaction, so the `queued/failed ->
//! syncing` flip is itself the mutual-exclusion mechanism - correctness
//! holds even if two process instances are accidentally started.

pub mod error;
pub mod manager;

pub use error::{QueueError, Result};
pub use manager::{DequeuedItem, QueueConfig, QueueManager};
