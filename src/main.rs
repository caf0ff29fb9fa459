//! Satchel CLI entrypoint

use clap::Parser;

use satchel::cli::{self, CacheCommands, Cli, Commands, QueueCommands};
use satchel::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init => cli::init::run(cli.config.as_deref()),
        Commands::Run => cli::run::run(cli.config.as_deref()).await,
        Commands::Status => cli::status::run(cli.format, cli.config.as_deref()),
        Commands::Version => {
            println!("satchel version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status => cli::cache::status(cli.format, cli.config.as_deref()),
            CacheCommands::Clear => cli::cache::clear(cli.format, cli.config.as_deref()),
            CacheCommands::Path => cli::cache::path(cli.config.as_deref()),
        },
        Commands::Queue(queue_cmd) => match queue_cmd {
            QueueCommands::List => cli::queue::list(cli.format, cli.config.as_deref()),
            QueueCommands::Purge { yes } => cli::queue::purge(yes, cli.config.as_deref()),
        },
        Commands::Precache { urls } => cli::precache::run(urls, cli.config.as_deref()).await,
        Commands::Sync => cli::sync::run(cli.config.as_deref()).await,
    }
}
