//! SQLite-backed versioned response store

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

type Result<T> = std::result::Result<T, StorageError>;

/// A serialized response: status, headers, body.
///
/// This is both what the gateway hands back from the network and what the
/// cache persists. Only successful (2xx) responses are ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Versioned key→response container.
///
/// Entries live in named stores; one store per cache version is active at
/// a time. `put` is idempotent (last write wins per key) and `get`
/// refreshes the entry's last-access time so eviction can walk
/// oldest-accessed-first.
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Open or create the cache database inside `data_dir`.
    pub fn open_at(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::Io(format!("Failed to create data dir: {}", e)))?;

        let db_path = Self::db_path(data_dir);
        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Cache schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            std::fs::remove_file(&db_path)
                .map_err(|e| StorageError::Io(format!("Failed to remove cache DB: {}", e)))?;
            return Self::open_at(data_dir);
        }

        // Cached responses are reconstructible from the network, so the
        // cache trades durability for write latency.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                store TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                inserted_at INTEGER NOT NULL,
                last_access INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (store, cache_key)
            );

            CREATE INDEX IF NOT EXISTS idx_cache_last_access
                ON cache_entries(last_access);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self { conn })
    }

    /// Cache database path inside a data directory.
    pub fn db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("cache.db")
    }

    /// Get a cached response and refresh its last-access time.
    pub fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>> {
        let row: Option<(u16, String, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT status, headers, body FROM cache_entries
                 WHERE store = ?1 AND cache_key = ?2",
                params![store, key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((status, headers_json, body)) = row else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        self.conn.execute(
            "UPDATE cache_entries SET last_access = ?3
             WHERE store = ?1 AND cache_key = ?2",
            params![store, key, now],
        )?;

        let headers: Vec<(String, String)> =
            serde_json::from_str(&headers_json).unwrap_or_default();

        Ok(Some(CachedResponse {
            status,
            headers,
            body,
        }))
    }

    /// Store a response under a key. Last write wins.
    ///
    /// Callers must only pass successful responses; the interceptor
    /// enforces the 2xx invariant before reaching this point.
    pub fn put(&self, store: &str, key: &str, entry: &CachedResponse) -> Result<()> {
        let headers_json = serde_json::to_string(&entry.headers)
            .map_err(|e| StorageError::Io(format!("Failed to encode headers: {}", e)))?;
        let now = Utc::now().timestamp();
        let size = (entry.body.len() + headers_json.len()) as i64;

        self.conn.execute(
            "INSERT OR REPLACE INTO cache_entries
             (store, cache_key, status, headers, body, inserted_at, last_access, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
            params![store, key, entry.status, headers_json, entry.body, now, size],
        )?;

        Ok(())
    }

    /// Delete an entire named store.
    pub fn delete_store(&self, store: &str) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM cache_entries WHERE store = ?1", [store])?;
        Ok(deleted)
    }

    /// List all store names currently present.
    pub fn list_stores(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT store FROM cache_entries ORDER BY store")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Activate a store: delete every store not matching it, atomically.
    /// Entries in the active store itself are untouched.
    pub fn activate(&mut self, active_store: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM cache_entries WHERE store != ?1",
            [active_store],
        )?;
        tx.commit()?;

        if deleted > 0 {
            log::info!("Cache activation removed {} stale entries", deleted);
        }
        Ok(deleted)
    }

    /// Delete oldest-accessed entries until at least `target_bytes` are
    /// freed or nothing evictable remains.
    pub fn evict_oldest(&mut self, target_bytes: u64) -> Result<EvictStats> {
        let tx = self.conn.transaction()?;
        let mut freed: u64 = 0;
        let mut removed: usize = 0;

        {
            let mut stmt = tx.prepare(
                "SELECT rowid, size_bytes FROM cache_entries
                 ORDER BY last_access ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (rowid, size) in rows {
                if freed >= target_bytes {
                    break;
                }
                tx.execute("DELETE FROM cache_entries WHERE rowid = ?1", [rowid])?;
                freed += size.max(0) as u64;
                removed += 1;
            }
        }

        tx.commit()?;
        Ok(EvictStats {
            freed_bytes: freed,
            entries_removed: removed,
        })
    }

    /// Clear all cache entries across every store.
    pub fn clear_all(&self) -> Result<ClearStats> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;

        self.conn.execute("DELETE FROM cache_entries", [])?;

        Ok(ClearStats {
            entries_removed: count as usize,
        })
    }

    /// Get cache statistics.
    pub fn stats(&self) -> Result<CacheStats> {
        let (total_entries, total_size): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let oldest: Option<i64> = self
            .conn
            .query_row("SELECT MIN(inserted_at) FROM cache_entries", [], |r| {
                r.get(0)
            })
            .optional()?
            .flatten();

        let newest: Option<i64> = self
            .conn
            .query_row("SELECT MAX(inserted_at) FROM cache_entries", [], |r| {
                r.get(0)
            })
            .optional()?
            .flatten();

        Ok(CacheStats {
            total_entries: total_entries as usize,
            total_size_bytes: total_size as usize,
            stores: self.list_stores()?.len(),
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }
}

/// Statistics about a cache clear operation
#[derive(Debug)]
pub struct ClearStats {
    pub entries_removed: usize,
}

/// Statistics about an eviction pass
#[derive(Debug, Clone, Copy)]
pub struct EvictStats {
    pub freed_bytes: u64,
    pub entries_removed: usize,
}

/// Statistics about cache state
#[derive(Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: usize,
    pub stores: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}
