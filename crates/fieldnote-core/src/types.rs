//! Identifier newtypes for queue items.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Stable identifier for a queue item.
///
/// Assigned once at creation and never reused. Also serves as the AEAD
/// associated data for the item's ciphertext, binding a payload to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidItemId(s.to_string()))
    }
}

/// Unique token accompanying every delivery attempt for an item.
///
/// Generated once at enqueue and never changed; the remote side collapses
/// repeated deliveries carrying the same key into a single effect.
///
/// Format: `{device_id}:{item_id}:{random}`. The device prefix keeps keys
/// globally unique even if two devices ever generate the same item id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a key for a freshly created item.
    pub fn generate(device_id: &str, item_id: &ItemId) -> Self {
        Self(format!("{}:{}:{}", device_id, item_id, Uuid::new_v4()))
    }

    /// Wrap a key read back from storage.
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_roundtrip() {
        let id = ItemId::generate();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_item_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<ItemId>().is_err());
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = ItemId::generate();
        let key = IdempotencyKey::generate("clinic-7", &id);

        let parts: Vec<&str> = key.as_str().splitn(3, ':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "clinic-7");
        assert_eq!(parts[1], id.to_string());
    }

    #[test]
    fn test_idempotency_keys_unique_for_same_item() {
        let id = ItemId::generate();
        let a = IdempotencyKey::generate("dev", &id);
        let b = IdempotencyKey::generate("dev", &id);
        assert_ne!(a, b);
    }
}
