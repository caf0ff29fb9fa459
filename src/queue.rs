//! Durable offline mutation queue
//!
//! Writes made while disconnected (or that failed against the backend)
//! wait here until the sync scheduler replays them. The queue lives in
//! its own database file so cache eviction can never touch it, and every
//! acknowledged enqueue is on disk before the call returns.

use chrono::Utc;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

type Result<T> = std::result::Result<T, StorageError>;

/// Logical queues. Each drains independently; ordering is only
/// guaranteed within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Generic data writes
    Sync,
    /// Learner reflections
    Reflections,
}

impl QueueKind {
    /// All queue kinds.
    pub const ALL: [QueueKind; 2] = [QueueKind::Sync, QueueKind::Reflections];

    /// Backend path queue items of this kind are delivered to.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            QueueKind::Sync => "/api/sync",
            QueueKind::Reflections => "/api/reflections",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Sync => "sync",
            QueueKind::Reflections => "reflections",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sync" => Some(QueueKind::Sync),
            "reflections" => Some(QueueKind::Reflections),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending (or synced) mutation.
///
/// The payload is opaque to the engine. Delivery is at-least-once, so
/// payloads must carry a stable client-generated id for the backend to
/// deduplicate replays.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub kind: QueueKind,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub synced: bool,
    pub retry_count: u32,
}

/// FIFO store of pending write operations.
pub struct MutationQueue {
    conn: Connection,
}

impl MutationQueue {
    /// Open or create the queue database inside `data_dir`.
    pub fn open_at(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::Io(format!("Failed to create data dir: {}", e)))?;

        let db_path = Self::db_path(data_dir);
        let conn = Connection::open(&db_path)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Queue schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            std::fs::remove_file(&db_path)
                .map_err(|e| StorageError::Io(format!("Failed to remove queue DB: {}", e)))?;
            return Self::open_at(data_dir);
        }

        // An acknowledged enqueue must survive an abrupt exit, so every
        // commit is fsynced.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_queue_pending
                ON queue_items(kind, synced, id);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self { conn })
    }

    /// Queue database path inside a data directory.
    pub fn db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("queue.db")
    }

    /// Append a mutation. Returns its id once the write is committed.
    pub fn enqueue(&self, kind: QueueKind, payload: &serde_json::Value) -> Result<i64> {
        let payload_json = payload.to_string();
        let now = Utc::now().timestamp();

        self.conn.execute(
            "INSERT INTO queue_items (kind, payload, created_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), payload_json, now],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Pending items of one kind, in strict creation order.
    pub fn list_pending(&self, kind: QueueKind) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, payload, created_at, synced, retry_count
             FROM queue_items WHERE kind = ?1 AND synced = 0 ORDER BY id",
        )?;
        let items = stmt
            .query_map([kind.as_str()], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Pending items across every kind, in strict creation order.
    pub fn list_all_pending(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, payload, created_at, synced, retry_count
             FROM queue_items WHERE synced = 0 ORDER BY id",
        )?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Flag an item as delivered. The flag is committed before returning.
    pub fn mark_synced(&self, id: i64) -> Result<bool> {
        let updated = self
            .conn
            .execute("UPDATE queue_items SET synced = 1 WHERE id = ?1", [id])?;
        Ok(updated > 0)
    }

    /// Remove an item outright.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM queue_items WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Record a failed delivery attempt. Does not reorder the item.
    pub fn bump_retry(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE queue_items SET retry_count = retry_count + 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Number of pending items of one kind.
    pub fn pending_len(&self, kind: QueueKind) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM queue_items WHERE kind = ?1 AND synced = 0",
            [kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Explicit user-triggered purge of every item, pending or synced.
    pub fn purge(&self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM queue_items", [])?;
        Ok(deleted)
    }

    /// Total bytes of pending payloads, for quota accounting.
    pub fn pending_bytes(&self) -> Result<u64> {
        let bytes: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM queue_items WHERE synced = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(bytes.max(0) as u64)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let kind_str: String = row.get(1)?;
    let payload_json: String = row.get(2)?;
    let synced: i64 = row.get(4)?;

    Ok(QueueItem {
        id: row.get(0)?,
        kind: QueueKind::parse(&kind_str).unwrap_or(QueueKind::Sync),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        created_at: row.get(3)?,
        synced: synced != 0,
        retry_count: row.get::<_, i64>(5)? as u32,
    })
}
