//! Mutation queue commands

use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

use crate::cli::{OutputFormat, cache::format_timestamp};
use crate::config::Config;
use crate::error::Result;
use crate::queue::MutationQueue;

#[derive(Debug, Tabled)]
struct QueueRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "QUEUE")]
    kind: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "RETRIES")]
    retries: u32,
}

/// List pending mutations across every queue kind
pub fn list(format: OutputFormat, config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let queue = MutationQueue::open_at(&config.data_dir()?)?;
    let pending = queue.list_all_pending()?;

    if format == OutputFormat::Json {
        let items: Vec<serde_json::Value> = pending
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id,
                    "queue": item.kind.as_str(),
                    "created_at": item.created_at,
                    "retry_count": item.retry_count,
                    "payload": item.payload,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("No pending mutations.");
        return Ok(());
    }

    let rows: Vec<QueueRow> = pending
        .iter()
        .map(|item| QueueRow {
            id: item.id,
            kind: item.kind.to_string(),
            created: format_timestamp(item.created_at),
            retries: item.retry_count,
        })
        .collect();

    let mut table = Table::new(&rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    println!("{}", table);

    Ok(())
}

/// Purge every queued mutation after confirmation
pub fn purge(yes: bool, config_path: Option<&str>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let queue = MutationQueue::open_at(&config.data_dir()?)?;
    let pending = queue.list_all_pending()?.len();

    if pending == 0 {
        println!("Queue is already empty.");
        return Ok(());
    }

    if !yes {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Discard {} pending mutation(s)? They will never reach the backend.",
                pending
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = queue.purge()?;
    println!("{}", format!("Purged {} mutation(s)", removed).yellow());

    Ok(())
}
