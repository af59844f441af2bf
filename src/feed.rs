//! Feed Synchronizer
//!
//! Keeps the in-memory list of feed posts in step with the backend, one page
//! at a time.
//!
//! A *reset* fetch starts over at offset 0 and replaces the list. An *append*
//! fetch requests the next page and extends the list. Once a page comes back
//! short, or the total row count is reached, the feed is exhausted and append
//! fetches become no-ops until the next reset.
//!
//! Every fetch takes a sequence number. A reset opens a new generation; a
//! response is applied only if no newer reset began after it was issued, and
//! an append only if the offset it was issued at is still current. Anything
//! else is discarded as stale, so a slow response can never overwrite a
//! newer one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::cache::{keys, FeedScope, FreshnessCache};
use crate::error::Result;
use crate::models::{FeedPage, Post};
use crate::storage::SignedUrls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchMode {
    Resetting,
    Appending,
}

impl FetchMode {
    fn from_reset(reset: bool) -> Self {
        if reset {
            FetchMode::Resetting
        } else {
            FetchMode::Appending
        }
    }
}

/// What a call to [`FeedSynchronizer::fetch`] did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchOutcome {
    /// The page was applied.
    Applied {
        mode: FetchMode,
        fetched: usize,
        has_more: bool,
    },
    /// Append requested after the last page; nothing was fetched.
    Exhausted,
    /// A newer fetch superseded this one; its response was dropped.
    Stale,
}

/// Read-only view of the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub items: Vec<Post>,
    pub offset: usize,
    pub has_more: bool,
    pub total_count: usize,
}

#[derive(Debug)]
struct FeedState {
    items: Vec<Post>,
    offset: usize,
    has_more: bool,
    total_count: usize,
    /// Sequence number of the most recently issued reset
    generation: u64,
    next_seq: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            offset: 0,
            has_more: true,
            total_count: 0,
            generation: 0,
            next_seq: 0,
        }
    }
}

/// Tunables for one feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub page_size: usize,
    pub cache_ttl: u64,
    pub signed_url_expires_in: u64,
}

// == Feed Synchronizer ==
/// Paginated feed for one [`FeedScope`]. Clones share state.
#[derive(Clone)]
pub struct FeedSynchronizer {
    backend: Arc<dyn Backend>,
    cache: FreshnessCache,
    signer: SignedUrls,
    scope: FeedScope,
    settings: FeedSettings,
    state: Arc<Mutex<FeedState>>,
}

impl FeedSynchronizer {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: FreshnessCache,
        scope: FeedScope,
        mut settings: FeedSettings,
    ) -> Self {
        // An empty page would never end pagination.
        if settings.page_size == 0 {
            warn!("Feed page size 0 for {:?}, using 1", scope);
            settings.page_size = 1;
        }
        let signer = SignedUrls::new(backend.clone(), cache.clone());
        Self {
            backend,
            cache,
            signer,
            scope,
            settings,
            state: Arc::new(Mutex::new(FeedState::default())),
        }
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn page_size(&self) -> usize {
        self.settings.page_size
    }

    // == Fetch ==
    /// Fetches one page, resetting the feed or appending to it.
    ///
    /// On error the feed is left exactly as it was.
    pub async fn fetch(&self, reset: bool) -> Result<FetchOutcome> {
        let mode = FetchMode::from_reset(reset);
        let (offset, seq, generation) = {
            let mut state = self.state.lock().await;
            if mode == FetchMode::Appending && !state.has_more {
                debug!("Feed {:?} exhausted, skipping append", self.scope);
                return Ok(FetchOutcome::Exhausted);
            }
            state.next_seq += 1;
            let seq = state.next_seq;
            if mode == FetchMode::Resetting {
                state.generation = seq;
            }
            let offset = match mode {
                FetchMode::Resetting => 0,
                FetchMode::Appending => state.offset,
            };
            (offset, seq, state.generation)
        };

        if mode == FetchMode::Resetting {
            self.cache.invalidate_prefix(&keys::feed_prefix(&self.scope)).await?;
        }

        let (page, from_cache) = match self.load_page(offset, mode == FetchMode::Appending).await {
            Ok(loaded) => loaded,
            Err(err) => {
                if err.is_transient() {
                    warn!("Feed fetch #{} ({:?}) failed, retry later: {}", seq, mode, err);
                } else {
                    error!("Feed fetch #{} ({:?}) failed: {}", seq, mode, err);
                }
                return Err(err);
            }
        };

        let mut state = self.state.lock().await;
        if state.generation != generation
            || (mode == FetchMode::Appending && state.offset != offset)
        {
            warn!("Discarding stale feed response #{} ({:?})", seq, mode);
            return Ok(FetchOutcome::Stale);
        }

        let fetched = page.items.len();
        let has_more = !page.is_last();
        match mode {
            FetchMode::Resetting => {
                state.items = page.items.clone();
                state.offset = fetched;
            }
            FetchMode::Appending => {
                state.items.extend(page.items.iter().cloned());
                state.offset += fetched;
            }
        }
        state.total_count = page.total_count;
        state.has_more = has_more;

        info!(
            "Feed fetch #{} ({:?}) applied {} posts, offset={}, has_more={}",
            seq, mode, fetched, state.offset, has_more
        );
        drop(state);

        // Cache only pages that were applied.
        if !from_cache {
            let key = keys::feed_page(&self.scope, page.limit, page.offset);
            if let Err(err) = self.cache.set(&key, &page, self.settings.cache_ttl).await {
                warn!("Could not cache feed page {}: {}", key, err);
            }
        }

        Ok(FetchOutcome::Applied {
            mode,
            fetched,
            has_more,
        })
    }

    /// Loads the page at `offset`, from cache when allowed and fresh.
    ///
    /// The flag is true when the page came from the cache.
    async fn load_page(&self, offset: usize, use_cache: bool) -> Result<(FeedPage, bool)> {
        let limit = self.settings.page_size;
        let key = keys::feed_page(&self.scope, limit, offset);

        if use_cache {
            if let Some(page) = self.cache.get::<FeedPage>(&key).await? {
                debug!("Feed page {} served from cache", key);
                return Ok((page, true));
            }
        }

        let mut batch = self
            .backend
            .fetch_posts(limit, offset, self.scope.user_id())
            .await?;
        for post in &mut batch.posts {
            post.image_url = self
                .signer
                .sign_post_image(&post.image_url, self.settings.signed_url_expires_in)
                .await;
        }

        Ok((FeedPage::new(batch, offset, limit), false))
    }

    // == Local edits ==
    /// Drops a post from the in-memory list after it was soft-deleted.
    pub async fn remove_local(&self, post_id: i64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|post| post.id != post_id);
        let removed = state.items.len() != before;
        if removed {
            // The backend list shrank by one; keep the next page aligned.
            state.offset = state.offset.saturating_sub(1);
            state.total_count = state.total_count.saturating_sub(1);
        }
        removed
    }

    /// Replaces a post in place, keeping the signed image URL and embedded profile.
    pub async fn update_local(&self, updated: Post) -> bool {
        let mut state = self.state.lock().await;
        match state.items.iter_mut().find(|post| post.id == updated.id) {
            Some(post) => {
                let image_url = std::mem::take(&mut post.image_url);
                let profiles = post.profiles.take();
                *post = Post {
                    image_url,
                    profiles: profiles.or(updated.profiles.clone()),
                    ..updated
                };
                true
            }
            None => false,
        }
    }

    // == Snapshot ==
    pub async fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.lock().await;
        FeedSnapshot {
            items: state.items.clone(),
            offset: state.offset,
            has_more: state.has_more,
            total_count: state.total_count,
        }
    }

    pub async fn has_more(&self) -> bool {
        self.state.lock().await.has_more
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cache::{KeyValueStore, MemoryStore};
    use crate::error::SyncError;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        store: Arc<MemoryStore>,
        feed: FeedSynchronizer,
    }

    async fn fixture(posts: usize) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed_posts("u1", posts).await;
        let store = Arc::new(MemoryStore::new());
        let feed = FeedSynchronizer::new(
            backend.clone(),
            FreshnessCache::new(store.clone()),
            FeedScope::All,
            FeedSettings {
                page_size: 10,
                cache_ttl: 300,
                signed_url_expires_in: 3600,
            },
        );
        Fixture { backend, store, feed }
    }

    fn ids(snapshot: &FeedSnapshot) -> Vec<i64> {
        snapshot.items.iter().map(|p| p.id).collect()
    }

    #[tokio::test]
    async fn test_paginates_ten_ten_five() {
        let f = fixture(25).await;

        f.feed.fetch(true).await.unwrap();
        let s = f.feed.snapshot().await;
        assert_eq!((s.items.len(), s.offset, s.has_more), (10, 10, true));

        f.feed.fetch(false).await.unwrap();
        let s = f.feed.snapshot().await;
        assert_eq!((s.items.len(), s.offset, s.has_more), (20, 20, true));

        let outcome = f.feed.fetch(false).await.unwrap();
        let s = f.feed.snapshot().await;
        assert_eq!((s.items.len(), s.has_more), (25, false));
        assert_eq!(
            outcome,
            FetchOutcome::Applied {
                mode: FetchMode::Appending,
                fetched: 5,
                has_more: false
            }
        );
    }

    #[tokio::test]
    async fn test_exhausted_feed_skips_backend_until_reset() {
        let f = fixture(5).await;
        f.feed.fetch(true).await.unwrap();
        assert!(!f.feed.has_more().await);
        let calls = f.backend.fetch_calls().await;

        assert_eq!(f.feed.fetch(false).await.unwrap(), FetchOutcome::Exhausted);
        assert_eq!(f.backend.fetch_calls().await, calls);

        f.feed.fetch(true).await.unwrap();
        assert_eq!(f.backend.fetch_calls().await, calls + 1);
    }

    #[tokio::test]
    async fn test_full_last_page_reaching_total_is_exhausted() {
        let f = fixture(20).await;
        f.feed.fetch(true).await.unwrap();
        f.feed.fetch(false).await.unwrap();
        assert!(!f.feed.has_more().await);
    }

    #[tokio::test]
    async fn test_reset_replaces_items_regardless_of_prior_state() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        f.feed.fetch(false).await.unwrap();
        let first_page: Vec<i64> = ids(&f.feed.snapshot().await)[..10].to_vec();

        f.feed.fetch(true).await.unwrap();
        let s = f.feed.snapshot().await;
        assert_eq!(s.offset, 10);
        assert_eq!(ids(&s), first_page);
        assert!(s.has_more);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_prefix() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        let before = ids(&f.feed.snapshot().await);

        f.feed.fetch(false).await.unwrap();
        let after = ids(&f.feed.snapshot().await);
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_state_untouched() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        let before = f.feed.snapshot().await;

        f.backend.fail_next_fetches(1).await;
        let err = f.feed.fetch(false).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(!err.user_message().is_empty());
        assert_eq!(f.feed.snapshot().await, before);

        f.backend.fail_next_fetches(1).await;
        assert!(f.feed.fetch(true).await.is_err());
        assert_eq!(f.feed.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_reset_invalidates_cached_pages() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        f.feed.fetch(false).await.unwrap();
        assert!(f.store.get_item("feed_posts_all:10_10").await.unwrap().is_some());

        f.feed.fetch(true).await.unwrap();
        assert!(f.store.get_item("feed_posts_all:10_10").await.unwrap().is_none());
        assert!(f.store.get_item("feed_posts_all:10_0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_append_served_from_fresh_cache() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        f.feed.fetch(false).await.unwrap();

        // A second synchronizer over the same cache reuses the cached second page.
        let other = FeedSynchronizer::new(
            f.backend.clone(),
            FreshnessCache::new(f.store.clone()),
            FeedScope::All,
            f.feed.settings.clone(),
        );
        {
            let mut state = other.state.lock().await;
            state.offset = 10;
        }
        let calls = f.backend.fetch_calls().await;
        other.fetch(false).await.unwrap();
        assert_eq!(f.backend.fetch_calls().await, calls);
    }

    #[tokio::test]
    async fn test_images_are_signed() {
        let f = fixture(3).await;
        f.feed.fetch(true).await.unwrap();
        let s = f.feed.snapshot().await;
        assert!(s.items.iter().all(|p| p.image_url.contains("/sign/posts/")));
    }

    #[tokio::test]
    async fn test_slow_older_reset_is_discarded() {
        let f = fixture(25).await;
        f.backend.push_fetch_delay(Duration::from_millis(200)).await;
        f.backend.push_fetch_delay(Duration::from_millis(10)).await;

        let slow = {
            let feed = f.feed.clone();
            tokio::spawn(async move { feed.fetch(true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = f.feed.fetch(true).await.unwrap();

        assert!(matches!(fast, FetchOutcome::Applied { .. }));
        assert_eq!(slow.await.unwrap().unwrap(), FetchOutcome::Stale);
        assert_eq!(f.feed.snapshot().await.offset, 10);
    }

    #[tokio::test]
    async fn test_append_overtaken_by_reset_is_discarded() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();

        f.backend.push_fetch_delay(Duration::from_millis(200)).await;
        let append = {
            let feed = f.feed.clone();
            tokio::spawn(async move { feed.fetch(false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.feed.fetch(true).await.unwrap();

        assert_eq!(append.await.unwrap().unwrap(), FetchOutcome::Stale);
        let s = f.feed.snapshot().await;
        assert_eq!((s.items.len(), s.offset), (10, 10));
    }

    #[tokio::test]
    async fn test_remove_local_realigns_offset() {
        let f = fixture(25).await;
        f.feed.fetch(true).await.unwrap();
        let victim = f.feed.snapshot().await.items[3].id;

        assert!(f.feed.remove_local(victim).await);
        assert!(!f.feed.remove_local(victim).await);
        let s = f.feed.snapshot().await;
        assert_eq!((s.items.len(), s.offset, s.total_count), (9, 9, 24));
    }

    #[tokio::test]
    async fn test_update_local_keeps_signed_image() {
        let f = fixture(3).await;
        f.feed.fetch(true).await.unwrap();
        let original = f.feed.snapshot().await.items[0].clone();

        let liked = f.backend.increment_likes(original.id).await.unwrap();
        assert!(f.feed.update_local(liked).await);

        let updated = f.feed.snapshot().await.items[0].clone();
        assert_eq!(updated.likes, 1);
        assert_eq!(updated.image_url, original.image_url);
    }

    #[tokio::test]
    async fn test_zero_page_size_still_exhausts() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed_posts("u1", 3).await;
        let feed = FeedSynchronizer::new(
            backend.clone(),
            FreshnessCache::new(Arc::new(MemoryStore::new())),
            FeedScope::All,
            FeedSettings {
                page_size: 0,
                cache_ttl: 300,
                signed_url_expires_in: 3600,
            },
        );
        assert_eq!(feed.page_size(), 1);

        feed.fetch(true).await.unwrap();
        for _ in 0..10 {
            if feed.fetch(false).await.unwrap() == FetchOutcome::Exhausted {
                break;
            }
        }

        let s = feed.snapshot().await;
        assert_eq!((s.items.len(), s.offset, s.has_more), (3, 3, false));
        assert_eq!(backend.fetch_calls().await, 3);
    }
}
