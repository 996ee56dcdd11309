//! CLI parser and dispatch.

mod config_cmd;
mod ops;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use opqueue::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "opq")]
#[command(about = "Inspect and manage a persisted operation queue")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Queue database file (overrides config file)
    #[arg(long, short = 'd', global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// List persisted operations in execution order
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Count persisted operations
    Count,

    /// Remove one persisted operation by id
    Remove {
        /// Operation id
        id: String,
    },

    /// Delete every persisted operation
    Purge {
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },

    /// Show the effective configuration
    Config,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        database: cli.database,
    };
    let (settings, config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::List { json } => ops::cmd_list(&settings, json).await,
        Commands::Count => ops::cmd_count(&settings).await,
        Commands::Remove { id } => ops::cmd_remove(&settings, &id).await,
        Commands::Purge { confirm } => ops::cmd_purge(&settings, confirm).await,
        Commands::Config => config_cmd::cmd_config_show(&settings, &config).await,
    }
}
