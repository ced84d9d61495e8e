//! CLI command implementations

pub mod check;
pub mod config;
pub mod listen;
pub mod servers;

use crate::cli::args::{Cli, Commands};
use crate::config::AppConfig;
use anyhow::{Context, Result};

/// Execute a CLI command
pub async fn execute_command(command: Commands, cli: &Cli) -> Result<()> {
    match command {
        Commands::Check { url, timeout, json } => {
            check::execute_check_command(cli, &url, timeout, json).await
        }
        Commands::Listen {
            once,
            notifications_file,
        } => listen::execute_listen_command(cli, once, notifications_file).await,
        Commands::Servers => servers::execute_servers_command(cli).await,
        Commands::Config { force } => config::execute_config_command(cli, force).await,
    }
}

/// Load the configuration named on the command line
pub(crate) fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = cli.config_path();
    AppConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}
