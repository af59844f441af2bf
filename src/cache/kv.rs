//! Local Key-Value Store
//!
//! Persistence seam under the freshness cache. Values are opaque strings; the
//! cache layers JSON on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Minimal async key-value store, the shape of a mobile platform's local storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: String) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
    async fn get_all_keys(&self) -> Result<Vec<String>>;
}

// == Memory Store ==
/// Process-local store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.items.read().await.keys().cloned().collect())
    }
}

// == File Store ==
/// Store persisted as a single JSON object, rewritten after every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!("Opened key-value store at {}", path.display());
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    async fn persist(&self, items: &HashMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec(items)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut items = self.items.write().await;
        items.insert(key.to_string(), value);
        self.persist(&items).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.write().await;
        if items.remove(key).is_some() {
            self.persist(&items).await?;
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.items.read().await.keys().cloned().collect())
    }
}
