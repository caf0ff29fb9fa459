//! Init command implementation

use colored::Colorize;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};

use crate::config::Config;
use crate::error::Result;

/// Run the init command
pub fn run(config_path: Option<&str>) -> Result<()> {
    println!("{}", "Welcome to Satchel!".bold().green());
    println!("Let's set up the offline engine.\n");

    let mut config = Config::load_or_default(config_path).unwrap_or_default();

    let backend_url: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Backend base URL")
        .default(config.backend_url.clone())
        .interact_text()?;

    let cache_version: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Cache version identifier")
        .default(config.cache_version.clone())
        .interact_text()?;

    let quota_mib: u64 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Storage quota (MiB)")
        .default(config.quota_bytes / (1024 * 1024))
        .interact_text()?;

    let offline_page: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Offline fallback page")
        .default(config.offline_page.clone())
        .interact_text()?;

    config.backend_url = backend_url;
    config.cache_version = cache_version;
    config.quota_bytes = quota_mib * 1024 * 1024;
    config.offline_page = offline_page;

    let path = match config_path {
        Some(p) => std::path::PathBuf::from(p),
        None => Config::default_path()?,
    };

    let save = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Save configuration to {}?", path.display()))
        .default(true)
        .interact()?;

    if save {
        config.save_to(path.clone())?;
        println!("\n{}", "✓ Configuration saved!".green());
        println!("Run {} to start the engine.", "satchel run".bold());
    } else {
        println!("Aborted.");
    }

    Ok(())
}
