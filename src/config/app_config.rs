//! Application configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{HomelinkError, Result};
use crate::models::Server;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Liveness worker configuration
    pub worker: WorkerConfig,
    /// Diagnostic pipeline configuration
    pub diagnostics: DiagnosticsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Registered servers
    pub servers: Vec<Server>,
}

/// Liveness worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between job re-evaluations while listening
    pub tick_secs: u64,
    /// Minutes between scheduled worker runs
    pub period_minutes: u64,
    /// Upper bound for a single keepalive ping
    pub ping_timeout_secs: u64,
    /// Single-instance lock; defaults to the runtime/cache directory
    pub lock_file: Option<PathBuf>,
}

/// Diagnostic pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Per-check timeout in seconds
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub structured: bool,
    /// Append logs to this file instead of stdout
    pub file: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            period_minutes: 15,
            ping_timeout_secs: 5,
            lock_file: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            file: None,
        }
    }
}

impl WorkerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_minutes.max(1) * 60)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }

    /// Configured lock file or `<runtime dir>/homelink/listen.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .or_else(dirs::cache_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("homelink")
                .join("listen.lock")
        })
    }
}

impl DiagnosticsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl AppConfig {
    /// `<config dir>/homelink/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("homelink")
            .join("config.toml")
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HomelinkError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Reject duplicate server ids and unusable URLs
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id) {
                return Err(HomelinkError::Config(format!(
                    "Duplicate server id {}",
                    server.id
                )));
            }

            Server::websocket_url(&server.external_url).map_err(|e| {
                HomelinkError::Config(format!(
                    "Server {} has an invalid external_url '{}': {}",
                    server.id, server.external_url, e
                ))
            })?;

            if let Some(internal) = &server.internal_url {
                Server::websocket_url(internal).map_err(|e| {
                    HomelinkError::Config(format!(
                        "Server {} has an invalid internal_url '{}': {}",
                        server.id, internal, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Example configuration written by `homelink config`
    pub fn example() -> Self {
        let mut server = Server::new(1, "https://homeassistant.example.com");
        server.name = "Home".to_string();
        server.internal_url = Some("http://homeassistant.local:8123".to_string());
        server.webhook_id = Some("replace-with-mobile-app-webhook-id".to_string());
        server.access_token = Some("replace-with-long-lived-access-token".to_string());
        server.internal_ssids = vec!["MyHomeWifi".to_string()];

        Self {
            servers: vec![server],
            ..Self::default()
        }
    }
}
