//! Freshness Cache Module
//!
//! TTL cache layered over a [`KeyValueStore`]. Entries are JSON-encoded
//! [`CacheEntry`] values; expiry is checked on read and stale entries are
//! removed as a side effect. There is no eviction beyond TTL.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{current_timestamp_ms, keys, CacheEntry, CacheStats, KeyValueStore};
use crate::error::Result;

// == Freshness Cache ==
/// Key-based TTL cache shared by every consumer of the context.
///
/// Cloning is cheap; clones share the same store and counters.
#[derive(Clone)]
pub struct FreshnessCache {
    /// Backing persistent store
    store: Arc<dyn KeyValueStore>,
    /// Read/removal statistics
    stats: Arc<Mutex<CacheStats>>,
}

impl FreshnessCache {
    // == Constructor ==
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    // == Get ==
    /// Returns the cached value for `key`, or `None` on a miss.
    ///
    /// Expired or undecodable entries count as misses and are removed.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match self.store.get_item(key).await? {
            Some(raw) => raw,
            None => {
                self.stats.lock().await.record_miss();
                return Ok(None);
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Dropping unreadable cache entry {}: {}", key, err);
                self.store.remove_item(key).await?;
                self.stats.lock().await.record_miss();
                return Ok(None);
            }
        };

        if entry.is_expired() {
            debug!("Cache entry {} expired", key);
            self.store.remove_item(key).await?;
            let mut stats = self.stats.lock().await;
            stats.record_expired(1);
            stats.record_miss();
            return Ok(None);
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                self.stats.lock().await.record_hit();
                Ok(Some(value))
            }
            Err(err) => {
                warn!("Cache entry {} has unexpected shape: {}", key, err);
                self.store.remove_item(key).await?;
                self.stats.lock().await.record_miss();
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl_seconds`, overwriting any prior entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let entry = CacheEntry::new(key, serde_json::to_value(value)?, ttl_seconds);
        self.write(entry).await
    }

    /// Stores `value` under `key` until the absolute Unix-millisecond `expires_at`.
    pub async fn set_until<T: Serialize>(&self, key: &str, value: &T, expires_at: u64) -> Result<()> {
        let entry = CacheEntry::until(key, serde_json::to_value(value)?, expires_at);
        self.write(entry).await
    }

    async fn write(&self, entry: CacheEntry) -> Result<()> {
        let raw = serde_json::to_string(&entry)?;
        self.store.set_item(&entry.key, raw).await
    }

    // == Invalidate ==
    /// Removes a single key. Returns true if it was present.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        if self.store.get_item(key).await?.is_none() {
            return Ok(false);
        }
        self.store.remove_item(key).await?;
        self.stats.lock().await.record_invalidated(1);
        debug!("Invalidated cache key {}", key);
        Ok(true)
    }

    /// Removes every key starting with `prefix`. Returns the number removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let matching: Vec<String> = self
            .store
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        for key in &matching {
            self.store.remove_item(key).await?;
        }

        self.stats.lock().await.record_invalidated(matching.len());
        debug!("Invalidated {} cache keys with prefix {}", matching.len(), prefix);
        Ok(matching.len())
    }

    // == Purge Expired ==
    /// Removes every expired entry in this crate's namespaces.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = current_timestamp_ms();
        let mut removed = 0;

        for key in self.owned_keys().await? {
            let Some(raw) = self.store.get_item(&key).await? else {
                continue;
            };
            let stale = match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => entry.is_expired_at(now),
                Err(_) => true,
            };
            if stale {
                self.store.remove_item(&key).await?;
                removed += 1;
            }
        }

        self.stats.lock().await.record_expired(removed);
        Ok(removed)
    }

    // == Clear ==
    /// Removes every entry in this crate's namespaces, leaving foreign keys alone.
    pub async fn clear_namespaces(&self) -> Result<usize> {
        let owned = self.owned_keys().await?;
        for key in &owned {
            self.store.remove_item(key).await?;
        }
        self.stats.lock().await.record_invalidated(owned.len());
        Ok(owned.len())
    }

    async fn owned_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|key| keys::is_owned(key))
            .collect())
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    /// Number of entries currently held in this crate's namespaces.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.owned_keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
