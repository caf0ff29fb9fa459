//! Bulk pre-cache command

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cache::{CacheStore, request_key, store_name};
use crate::config::Config;
use crate::error::Result;
use crate::gateway::{Gateway, HttpGateway};

/// Fetch-and-store a list of URLs into the active cache store
pub async fn run(urls: Vec<String>, config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let cache = CacheStore::open_at(&config.data_dir()?)?;
    let gateway = HttpGateway::new()?;
    let store = store_name(&config.cache_version);

    let bar = ProgressBar::new(urls.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress template is valid")
            .progress_chars("━━╌"),
    );

    let mut cached = 0usize;
    let mut failures: Vec<String> = Vec::new();

    for url in &urls {
        bar.set_message(url.clone());

        match gateway.get(url).await {
            Ok(response) if response.is_success() => {
                cache.put(&store, &request_key("GET", url), &response)?;
                cached += 1;
            }
            Ok(response) => {
                failures.push(format!("{} returned status {}", url, response.status));
            }
            Err(err) => {
                failures.push(format!("{}: {}", url, err));
            }
        }

        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("Cached {} of {} URL(s) into {}", cached, urls.len(), store);
    for failure in &failures {
        println!("{}", format!("  failed: {}", failure).yellow());
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(crate::error::Error::Other(format!(
            "{} URL(s) could not be cached",
            failures.len()
        )))
    }
}
