//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL
//! batch that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // Create migrations table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Queue items: one row per record pending or completed delivery.
        -- Only ciphertext is stored; plaintext metadata (ids, status,
        -- timestamps) lives alongside for queue management.
        CREATE TABLE queue_items (
            id TEXT PRIMARY KEY,                  -- UUID, assigned at creation
            idempotency_key TEXT NOT NULL UNIQUE, -- sent on every delivery attempt
            mode TEXT NOT NULL,                   -- 'demo' | 'prod'
            key_id TEXT NOT NULL,                 -- fingerprint of sealing key
            ciphertext BLOB NOT NULL,             -- nonce || AEAD ciphertext
            status TEXT NOT NULL DEFAULT 'queued',
            fail_reason TEXT,                     -- last error description
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,          -- Unix ms
            updated_at INTEGER NOT NULL           -- Unix ms, advances per transition
        );

        -- Append-only audit of delivery attempts.
        CREATE TABLE sync_attempts (
            attempt_id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL REFERENCES queue_items(id),
            attempted_at INTEGER NOT NULL,        -- Unix ms
            success INTEGER NOT NULL,             -- 0 | 1
            response_code INTEGER,
            error_message TEXT,
            duration_ms INTEGER
        );

        -- Indexes for dequeue scans and time-range queries
        CREATE INDEX idx_queue_items_status ON queue_items(status);
        CREATE INDEX idx_queue_items_created ON queue_items(created_at);
        CREATE INDEX idx_sync_attempts_item ON sync_attempts(item_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"queue_items".to_string()));
        assert!(tables.contains(&"sync_attempts".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap(); // Should not error
        migrate(&mut conn).unwrap(); // Still should not error

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_idempotency_key_is_unique() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO queue_items (id, idempotency_key, mode, key_id, ciphertext, status, created_at, updated_at)
             VALUES ('a', 'k', 'demo', 'kid', x'00', 'queued', 0, 0)",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO queue_items (id, idempotency_key, mode, key_id, ciphertext, status, created_at, updated_at)
             VALUES ('b', 'k', 'demo', 'kid', x'00', 'queued', 0, 0)",
            [],
        );
        assert!(dup.is_err());
    }
}
