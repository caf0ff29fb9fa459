//! CLI command definitions and handlers

use clap::{Parser, Subcommand, ValueEnum};

pub mod cache;
pub mod init;
pub mod precache;
pub mod queue;
pub mod run;
pub mod status;
pub mod sync;

/// Output format for commands that print data
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Satchel - offline-first cache and sync engine
#[derive(Parser, Debug)]
#[command(name = "satchel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, json)
    #[arg(
        long,
        global = true,
        env = "SATCHEL_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "SATCHEL_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "SATCHEL_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize satchel configuration
    Init,

    /// Run the background engine
    Run,

    /// Show engine configuration and storage status
    Status,

    /// Display version information
    Version,

    /// Manage the local response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Inspect and manage the offline mutation queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Proactively fetch-and-store a list of URLs
    Precache {
        /// URLs to cache
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Drain pending offline mutations now
    Sync,
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Status,
    /// Clear all cached responses
    Clear,
    /// Print the engine data directory path
    Path,
}

/// Mutation queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List pending mutations
    List,
    /// Purge every queued mutation
    Purge {
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}
