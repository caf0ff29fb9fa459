//! One-shot queue drain command

use std::sync::{Arc, Mutex};

use colored::Colorize;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::Result;
use crate::gateway::HttpGateway;
use crate::queue::MutationQueue;
use crate::sync::SyncScheduler;

/// Drain pending mutations against the backend once
pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let queue = Arc::new(Mutex::new(MutationQueue::open_at(&config.data_dir()?)?));

    let pending = queue
        .lock()
        .map_err(|_| crate::error::Error::Other("queue lock poisoned".to_string()))?
        .list_all_pending()?
        .len();
    if pending == 0 {
        println!("No pending mutations.");
        return Ok(());
    }

    let gateway = Arc::new(HttpGateway::new()?);
    let (_connectivity_tx, connectivity_rx) = watch::channel(true);
    let (_kick_tx, kick_rx) = mpsc::channel(1);

    let scheduler = SyncScheduler::new(
        queue,
        gateway,
        config.backend_url.clone(),
        config.sync_interval(),
        connectivity_rx,
        kick_rx,
    );

    println!("Draining {} pending mutation(s)...", pending);
    let report = scheduler.drain_all().await;

    if report.failed == 0 {
        println!("{}", format!("Delivered {} mutation(s)", report.delivered).green());
    } else {
        println!(
            "{}",
            format!(
                "Delivered {}, {} still pending after a failure",
                report.delivered,
                pending - report.delivered
            )
            .yellow()
        );
    }

    Ok(())
}
