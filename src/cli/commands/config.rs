//! Config command implementation

use anyhow::{Context, Result, bail};

use crate::cli::args::Cli;
use crate::config::AppConfig;
use crate::utils::logging::init_cli_logging;

pub async fn execute_config_command(cli: &Cli, force: bool) -> Result<()> {
    init_cli_logging(cli.verbose, cli.quiet)?;

    let path = cli.config_path();
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    AppConfig::example()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote example configuration to {}", path.display());
    println!("Fill in webhook_id and access_token for each server, then run `homelink listen`.");
    Ok(())
}
