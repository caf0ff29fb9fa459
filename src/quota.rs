//! Storage quota accounting and eviction
//!
//! Tracks aggregate usage of the engine's databases against the
//! configured budget. Eviction only ever walks the response cache:
//! the mutation queue and config/subscription state are off-limits no
//! matter how hard quota pressure gets.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::cache::{CacheStore, EvictStats};
use crate::error::{Error, Result};

/// Point-in-time storage usage. Derived at query time, never persisted.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaSnapshot {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub available_bytes: u64,
    pub percentage: f64,
}

/// Monitors usage and trims the cache under pressure.
pub struct QuotaManager {
    data_dir: PathBuf,
    quota_bytes: u64,
    high_water_percent: u8,
    cache: Arc<Mutex<CacheStore>>,
}

impl QuotaManager {
    pub fn new(
        data_dir: PathBuf,
        quota_bytes: u64,
        high_water_percent: u8,
        cache: Arc<Mutex<CacheStore>>,
    ) -> Self {
        Self {
            data_dir,
            quota_bytes,
            high_water_percent,
            cache,
        }
    }

    /// Current usage against the configured budget.
    pub fn snapshot(&self) -> Result<QuotaSnapshot> {
        let used_bytes = dir_used(&self.data_dir)?;
        let available_bytes = self.quota_bytes.saturating_sub(used_bytes);
        let percentage = if self.quota_bytes == 0 {
            100.0
        } else {
            (used_bytes as f64 / self.quota_bytes as f64) * 100.0
        };

        Ok(QuotaSnapshot {
            used_bytes,
            quota_bytes: self.quota_bytes,
            available_bytes,
            percentage,
        })
    }

    /// True once usage crosses the high-water mark. Crossing it warns the
    /// user; it never forces eviction by itself.
    pub fn over_high_water(&self) -> Result<bool> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.percentage >= f64::from(self.high_water_percent.min(100)))
    }

    /// Free at least `target_bytes` by evicting oldest-accessed cache
    /// entries. Protected stores are untouched by construction: only the
    /// cache database is ever walked.
    pub fn evict(&self, target_bytes: u64) -> Result<EvictStats> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Other("cache lock poisoned".to_string()))?;
        Ok(cache.evict_oldest(target_bytes)?)
    }
}

/// Bytes used by the engine's database files (including WAL segments).
fn dir_used(data_dir: &Path) -> Result<u64> {
    let mut used = 0u64;

    let entries = match std::fs::read_dir(data_dir) {
        Ok(entries) => entries,
        // A data dir that does not exist yet uses nothing
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("cache.db") || name.starts_with("queue.db") {
            used += entry.metadata()?.len();
        }
    }

    Ok(used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedResponse;
    use crate::queue::{MutationQueue, QueueKind};
    use tempfile::TempDir;

    fn fixture(quota_bytes: u64) -> (QuotaManager, Arc<Mutex<CacheStore>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(Mutex::new(CacheStore::open_at(dir.path()).unwrap()));
        let manager = QuotaManager::new(
            dir.path().to_path_buf(),
            quota_bytes,
            90,
            Arc::clone(&cache),
        );
        (manager, cache, dir)
    }

    fn response(size: usize) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: Vec::new(),
            body: vec![b'x'; size],
        }
    }

    #[test]
    fn test_snapshot_fields() {
        let (manager, cache, _dir) = fixture(10 * 1024 * 1024);
        cache
            .lock()
            .unwrap()
            .put("satchel-cache-v1", "k", &response(1024))
            .unwrap();

        let snapshot = manager.snapshot().unwrap();
        assert!(snapshot.used_bytes > 0);
        assert_eq!(snapshot.quota_bytes, 10 * 1024 * 1024);
        assert_eq!(
            snapshot.available_bytes,
            snapshot.quota_bytes - snapshot.used_bytes
        );
        assert!(snapshot.percentage > 0.0 && snapshot.percentage < 100.0);
    }

    #[test]
    fn test_snapshot_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(Mutex::new(CacheStore::open_at(dir.path()).unwrap()));
        let manager = QuotaManager::new(
            dir.path().join("does-not-exist"),
            1024,
            90,
            cache,
        );

        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.used_bytes, 0);
        assert_eq!(snapshot.available_bytes, 1024);
    }

    #[test]
    fn test_over_high_water() {
        // A tiny quota is immediately over the mark once the DB exists
        let (manager, _cache, _dir) = fixture(1);
        assert!(manager.over_high_water().unwrap());

        let (manager, _cache, _dir) = fixture(u64::MAX);
        assert!(!manager.over_high_water().unwrap());
    }

    #[test]
    fn test_evict_frees_target_oldest_first() {
        let (manager, cache, _dir) = fixture(1024);
        {
            let store = cache.lock().unwrap();
            store.put("satchel-cache-v1", "old", &response(500)).unwrap();
            store.put("satchel-cache-v1", "new", &response(500)).unwrap();
            // Refresh "new" so "old" is the eviction candidate
            store.get("satchel-cache-v1", "new").unwrap();
        }

        let stats = manager.evict(400).unwrap();
        assert!(stats.freed_bytes >= 400);
        assert_eq!(stats.entries_removed, 1);

        let store = cache.lock().unwrap();
        assert!(store.get("satchel-cache-v1", "old").unwrap().is_none());
        assert!(store.get("satchel-cache-v1", "new").unwrap().is_some());
    }

    #[test]
    fn test_evict_never_touches_queue_under_full_pressure() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(Mutex::new(CacheStore::open_at(dir.path()).unwrap()));
        let queue = MutationQueue::open_at(dir.path()).unwrap();

        queue
            .enqueue(QueueKind::Sync, &serde_json::json!({"client_id": "keep-me"}))
            .unwrap();
        cache
            .lock()
            .unwrap()
            .put("satchel-cache-v1", "k", &response(1000))
            .unwrap();

        // Quota of 1 byte simulates 100% pressure
        let manager = QuotaManager::new(dir.path().to_path_buf(), 1, 90, Arc::clone(&cache));
        assert!(manager.over_high_water().unwrap());

        manager.evict(u64::MAX).unwrap();

        // Cache is empty, queue survived untouched
        assert_eq!(cache.lock().unwrap().stats().unwrap().total_entries, 0);
        assert_eq!(queue.pending_len(QueueKind::Sync).unwrap(), 1);
    }
}
