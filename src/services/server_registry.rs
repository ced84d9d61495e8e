//! Read-only view over the registered servers

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::errors::{HomelinkError, Result};
use crate::models::Server;

/// Where the liveness worker and the CLI look up servers
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn get_server(&self, id: u32) -> Option<Server>;

    /// Every registered server, in configuration order
    async fn default_servers(&self) -> Result<Vec<Server>>;

    /// At least one server has finished registration (holds a token)
    async fn is_registered(&self) -> bool {
        match self.default_servers().await {
            Ok(servers) => servers.iter().any(|s| s.access_token.is_some()),
            Err(e) => {
                log::warn!("Unable to read servers: {}", e);
                false
            }
        }
    }
}

/// Registry over a fixed, replaceable list
#[derive(Debug, Default)]
pub struct MemoryServerRegistry {
    servers: RwLock<Vec<Server>>,
}

impl MemoryServerRegistry {
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers: RwLock::new(servers),
        }
    }

    pub async fn set_servers(&self, servers: Vec<Server>) {
        *self.servers.write().await = servers;
    }
}

#[async_trait]
impl ServerRegistry for MemoryServerRegistry {
    async fn get_server(&self, id: u32) -> Option<Server> {
        self.servers.read().await.iter().find(|s| s.id == id).cloned()
    }

    async fn default_servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers.read().await.clone())
    }
}

struct Snapshot {
    modified: Option<SystemTime>,
    servers: Vec<Server>,
}

/// Registry backed by the configuration file, re-read whenever its
/// modification time changes. A broken edit keeps the last good list.
pub struct FileServerRegistry {
    path: PathBuf,
    cache: RwLock<Snapshot>,
}

impl FileServerRegistry {
    pub fn new(path: impl Into<PathBuf>, servers: Vec<Server>) -> Self {
        let path = path.into();
        let modified = modified_time(&path);
        Self {
            path,
            cache: RwLock::new(Snapshot { modified, servers }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn servers(&self) -> Vec<Server> {
        let current = self.modified_time().await;
        {
            let cache = self.cache.read().await;
            if cache.modified == current {
                return cache.servers.clone();
            }
        }

        // Parse outside the lock; the write below re-checks the mtime
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || AppConfig::load_or_default(&path))
            .await
            .map_err(|e| HomelinkError::Io(std::io::Error::other(e)))
            .and_then(|result| result);

        let mut cache = self.cache.write().await;
        if cache.modified != current {
            match loaded {
                Ok(config) => {
                    log::info!(
                        "Reloaded {} server(s) from {}",
                        config.servers.len(),
                        self.path.display()
                    );
                    cache.servers = config.servers;
                }
                Err(e) => {
                    log::error!(
                        "Keeping previous servers, failed to reload {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
            cache.modified = current;
        }
        cache.servers.clone()
    }

    async fn modified_time(&self) -> Option<SystemTime> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || modified_time(&path))
            .await
            .ok()
            .flatten()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[async_trait]
impl ServerRegistry for FileServerRegistry {
    async fn get_server(&self, id: u32) -> Option<Server> {
        self.servers().await.into_iter().find(|s| s.id == id)
    }

    async fn default_servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_registry_lookup() {
        let mut registered = Server::new(2, "https://b.example.com");
        registered.access_token = Some("token".to_string());
        let registry = MemoryServerRegistry::new(vec![
            Server::new(1, "https://a.example.com"),
            registered,
        ]);

        assert_eq!(registry.get_server(2).await.map(|s| s.id), Some(2));
        assert!(registry.get_server(9).await.is_none());
        assert!(registry.is_registered().await);

        registry
            .set_servers(vec![Server::new(1, "https://a.example.com")])
            .await;
        assert!(!registry.is_registered().await);
    }

    #[tokio::test]
    async fn test_file_registry_keeps_previous_on_bad_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[servers]]\nid = 1\nexternal_url = \"https://a.example.com\"\n",
        )
        .unwrap();

        let registry = FileServerRegistry::new(&path, Vec::new());
        // Constructed with a matching mtime, so the seed list is served
        assert!(registry.default_servers().await.unwrap().is_empty());

        {
            let mut cache = registry.cache.write().await;
            cache.modified = None;
        }
        assert_eq!(registry.default_servers().await.unwrap().len(), 1);

        std::fs::write(&path, "this is [not toml").unwrap();
        {
            let mut cache = registry.cache.write().await;
            cache.modified = None;
        }
        assert_eq!(registry.default_servers().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_see_reloaded_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[servers]]\nid = 1\nexternal_url = \"https://a.example.com\"\n\n\
             [[servers]]\nid = 2\nexternal_url = \"https://b.example.com\"\n",
        )
        .unwrap();

        let registry = std::sync::Arc::new(FileServerRegistry::new(&path, Vec::new()));
        registry.cache.write().await.modified = None;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.default_servers().await.unwrap().len() })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 2);
        }
        assert_eq!(
            registry.cache.read().await.modified,
            modified_time(&path)
        );
    }
}
