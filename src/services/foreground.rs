//! Foreground execution for the liveness worker
//!
//! While the worker holds a [`ForegroundGuard`] it is the single process
//! keeping persistent connections open. On the desktop this is a lock file
//! carrying our pid.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::notification_sink::NotificationSink;
use crate::errors::HomelinkError;
use crate::platform::utils::process_alive;

/// Source tag of the notice posted when the worker may not run
pub const RESTRICTED_SOURCE: &str = "WebsocketRestricted";
/// Where the user can change the connection setting
pub const SETTINGS_DEEP_LINK: &str = "homelink://settings/websocket";

/// The host refused foreground execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundDenied {
    pub reason: String,
}

impl fmt::Display for ForegroundDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "foreground execution denied: {}", self.reason)
    }
}

impl std::error::Error for ForegroundDenied {}

impl From<ForegroundDenied> for HomelinkError {
    fn from(denied: ForegroundDenied) -> Self {
        HomelinkError::PlatformRestricted(denied.reason)
    }
}

/// Held for as long as the work runs in the foreground
pub struct ForegroundGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ForegroundGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[async_trait]
pub trait ForegroundHost: Send + Sync {
    async fn acquire(&self) -> Result<ForegroundGuard, ForegroundDenied>;

    /// Tell the user that notifications will be delayed
    async fn post_restricted_notice(&self, reason: &str);
}

/// Single-instance lock file
pub struct LockFileForegroundHost {
    path: PathBuf,
    sink: Arc<dyn NotificationSink>,
}

impl LockFileForegroundHost {
    pub fn new(path: impl Into<PathBuf>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            path: path.into(),
            sink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(&self) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(())
    }

    /// Pid recorded in an existing lock, if it belongs to a live process
    fn live_owner(&self) -> Option<u32> {
        let pid: u32 = std::fs::read_to_string(&self.path)
            .ok()?
            .trim()
            .parse()
            .ok()?;
        (pid != std::process::id() && process_alive(pid)).then_some(pid)
    }
}

#[async_trait]
impl ForegroundHost for LockFileForegroundHost {
    async fn acquire(&self) -> Result<ForegroundGuard, ForegroundDenied> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForegroundDenied {
                reason: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }

        for attempt in 0..2 {
            match self.try_create() {
                Ok(()) => {
                    log::debug!("Acquired listener lock {}", self.path.display());
                    let path = self.path.clone();
                    return Ok(ForegroundGuard::new(move || {
                        if let Err(e) = std::fs::remove_file(&path) {
                            log::warn!("Failed to remove lock {}: {}", path.display(), e);
                        }
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt == 0 => {
                    if let Some(pid) = self.live_owner() {
                        return Err(ForegroundDenied {
                            reason: format!("another listener (pid {}) is already running", pid),
                        });
                    }
                    log::warn!("Removing stale lock {}", self.path.display());
                    let _ = std::fs::remove_file(&self.path);
                }
                Err(e) => {
                    return Err(ForegroundDenied {
                        reason: format!("cannot create {}: {}", self.path.display(), e),
                    });
                }
            }
        }

        Err(ForegroundDenied {
            reason: format!("lock {} keeps reappearing", self.path.display()),
        })
    }

    async fn post_restricted_notice(&self, reason: &str) {
        let mut data = HashMap::new();
        data.insert(
            "title".to_string(),
            "Notifications may be delayed".to_string(),
        );
        data.insert(
            "message".to_string(),
            format!("The persistent connection could not start: {}", reason),
        );
        data.insert("settings".to_string(), SETTINGS_DEEP_LINK.to_string());
        self.sink.handle_message(data, RESTRICTED_SOURCE).await;
    }
}
