//! Run the background engine until interrupted

use std::sync::Arc;

use colored::Colorize;
use log::info;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::gateway::HttpGateway;

/// Start the engine and sync scheduler, then wait for Ctrl-C
pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;

    println!("{}", "Starting satchel engine".bold());
    println!("Backend:       {}", config.backend_url);
    println!("Cache version: {}", config.cache_version);
    println!("Data dir:      {}", config.data_dir()?.display());

    let gateway = Arc::new(HttpGateway::new()?);
    let (engine, handle, scheduler) = Engine::new(config.clone(), gateway)?;

    let engine_task = tokio::spawn(engine.run());
    let scheduler_task = tokio::spawn(scheduler.run());

    // Warm the shell cache before traffic arrives
    if !config.static_manifest.is_empty() {
        let mut shell = config.static_manifest.clone();
        shell.push(config.offline_page.clone());
        let report = handle.precache(shell).await?;
        if report.success {
            info!("precached {} shell asset(s)", report.cached);
        } else if let Some(error) = report.error {
            log::warn!("shell precache incomplete: {}", error);
        }
    }

    println!("{}", "Engine running. Press Ctrl-C to stop.".green());
    tokio::signal::ctrl_c().await?;

    println!("Shutting down...");
    handle.shutdown().await?;
    let _ = engine_task.await;
    scheduler_task.abort();

    Ok(())
}
