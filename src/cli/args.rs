//! Command line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "homelink")]
#[command(about = "Keeps Home Assistant notification channels alive and diagnoses connectivity")]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/homelink/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease logging verbosity (only errors)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Emit JSON log lines (listen only)
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Append logs to a file instead of stdout (listen only)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Diagnose why a server URL is or is not reachable
    Check {
        /// Server URL, e.g. https://homeassistant.local:8123
        url: String,
        /// Per-check timeout in seconds (overrides the config)
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Print every intermediate state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep notification subscriptions open until interrupted
    Listen {
        /// Run a single worker cycle instead of scheduling it periodically
        #[arg(long)]
        once: bool,
        /// Write received notifications to this JSON lines file instead of the log
        #[arg(long, value_name = "PATH")]
        notifications_file: Option<PathBuf>,
    },
    /// List configured servers and whether they currently qualify
    Servers,
    /// Write an example configuration file
    Config {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// `--config` or the platform default
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::AppConfig::default_path)
    }
}
