//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries from the
//! persisted store. Reads already drop stale entries; the sweep reclaims the
//! ones nobody reads again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::FreshnessCache;

/// Spawns a background task that purges expired entries every `interval_secs`.
///
/// # Example
/// ```ignore
/// let handle = spawn_cleanup_task(cache.clone(), 60);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: FreshnessCache, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!("Starting TTL sweep task with interval of {} seconds", interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            match cache.purge_expired().await {
                Ok(0) => debug!("TTL sweep: no expired entries found"),
                Ok(removed) => info!("TTL sweep: removed {} expired entries", removed),
                Err(err) => warn!("TTL sweep failed: {}", err),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{current_timestamp_ms, KeyValueStore, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = FreshnessCache::new(store.clone());
        cache
            .set_until("profile_gone", &"v", current_timestamp_ms() + 500)
            .await
            .unwrap();
        cache.set("profile_kept", &"v", 3600).await.unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.get_item("profile_gone").await.unwrap().is_none());
        assert!(store.get_item("profile_kept").await.unwrap().is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let cache = FreshnessCache::new(Arc::new(MemoryStore::new()));
        let handle = spawn_cleanup_task(cache, 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
