//! Hand-off point for received notifications

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::errors::Result;

/// Receives flattened notifications; presentation is up to the implementor
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn handle_message(&self, data: HashMap<String, String>, source: &str);
}

/// Writes every notification to the log
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn handle_message(&self, data: HashMap<String, String>, source: &str) {
        let title = data.get("title").map(String::as_str).unwrap_or("");
        let message = data.get("message").map(String::as_str).unwrap_or("");
        log::info!("[{}] {}: {}", source, title, message);

        let sorted: BTreeMap<_, _> = data.iter().collect();
        log::debug!("[{}] payload: {:?}", source, sorted);
    }
}

/// Appends one JSON object per notification to a file
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, data: &HashMap<String, String>, source: &str) -> Result<()> {
        let record = serde_json::json!({
            "received_at": Utc::now().to_rfc3339(),
            "source": source,
            "data": data.iter().collect::<BTreeMap<_, _>>(),
        });

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", record).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for JsonLinesSink {
    async fn handle_message(&self, data: HashMap<String, String>, source: &str) {
        if let Err(e) = self.append(&data, source).await {
            log::error!(
                "Failed to record notification in {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
