use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stager::config::ConfigOverrides;

mod cmd;

#[derive(Parser)]
#[command(name = "stager")]
#[command(version, about = "Runs application staging as isolated cluster tasks")]
pub struct Cli {
    /// Path to stager.toml. Defaults to ./stager.toml when present.
    #[arg(short, long, global = true, env = "STAGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the staging API
    Run,
    /// Manage tenant staging namespaces
    Namespace {
        #[command(subcommand)]
        command: NamespaceCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum NamespaceCommands {
    /// Create the tenant's namespace if it does not exist
    Ensure {
        #[arg(long)]
        tenant: String,
    },
    /// Delete the tenant's namespace and all staging tasks in it
    Remove {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate configuration and list any problems
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env values feed clap's `env` fallbacks, so load them first
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = cmd::load_config(&cli)?;
    stager::logging::init_logging(&config.logging.level, config.logging.format);

    match &cli.command {
        Commands::Run => cmd::cmd_run(&config).await?,
        Commands::Namespace { command } => cmd::cmd_namespace(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
