//! Status command implementation

use std::sync::{Arc, Mutex};

use colored::Colorize;

use crate::cache::CacheStore;
use crate::cli::{OutputFormat, cache::format_size};
use crate::config::Config;
use crate::error::Result;
use crate::queue::{MutationQueue, QueueKind};
use crate::quota::QuotaManager;

/// Show engine configuration and storage status
pub fn run(format: OutputFormat, config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let data_dir = config.data_dir()?;

    let cache = Arc::new(Mutex::new(CacheStore::open_at(&data_dir)?));
    let queue = MutationQueue::open_at(&data_dir)?;

    let stats = cache
        .lock()
        .map_err(|_| crate::error::Error::Other("cache lock poisoned".to_string()))?
        .stats()?;
    let pending_sync = queue.pending_len(QueueKind::Sync)?;
    let pending_reflections = queue.pending_len(QueueKind::Reflections)?;

    let quota = QuotaManager::new(
        data_dir.clone(),
        config.quota_bytes,
        config.high_water_percent,
        Arc::clone(&cache),
    );
    let snapshot = quota.snapshot()?;

    if format == OutputFormat::Json {
        let json = serde_json::json!({
            "backend_url": config.backend_url,
            "cache_version": config.cache_version,
            "data_dir": data_dir.display().to_string(),
            "sync_interval_secs": config.sync_interval().as_secs(),
            "cache_entries": stats.total_entries,
            "pending_sync": pending_sync,
            "pending_reflections": pending_reflections,
            "quota": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", "Satchel Engine Status".bold());
    println!("────────────────────────────────────────");
    println!("Backend:        {}", config.backend_url);
    println!("Cache version:  {}", config.cache_version);
    println!("Data directory: {}", data_dir.display());
    println!("Sync interval:  {}s", config.sync_interval().as_secs());
    println!();
    println!("Cached responses:    {}", stats.total_entries);
    println!("Pending mutations:   {} sync, {} reflections", pending_sync, pending_reflections);

    let usage = format!(
        "{} of {} ({:.1}%)",
        format_size(snapshot.used_bytes as usize),
        format_size(snapshot.quota_bytes as usize),
        snapshot.percentage
    );
    let high_water = f64::from(config.high_water_percent.min(100));
    if snapshot.percentage >= high_water {
        println!("Storage usage:       {}", usage.red().bold());
        println!(
            "{}",
            "Storage is near its quota. Run `satchel cache clear` to free space.".yellow()
        );
    } else if snapshot.percentage >= high_water * 0.75 {
        println!("Storage usage:       {}", usage.yellow());
    } else {
        println!("Storage usage:       {}", usage.green());
    }

    Ok(())
}
