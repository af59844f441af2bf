//! App Context
//!
//! One explicitly constructed context owns the backend, the freshness cache,
//! the session, the shared feed and the detection queue. Every screen-level
//! operation goes through it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::cache::{keys, FeedScope, FreshnessCache, KeyValueStore};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::feed::{FeedSettings, FeedSynchronizer};
use crate::models::{
    Friend, FriendStatus, Message, Post, PremiumUser, Profile, ProfileUpdate, Session,
};
use crate::realtime::{Channel, DetectionUpdates, ListenerHandle, RealtimeListener};
use crate::session::{Lifecycle, SessionHolder};
use crate::storage::SignedUrls;
use crate::tasks::{spawn_detection_worker, DetectionJob, DetectionQueue};

/// Bucket holding post images.
pub const POSTS_BUCKET: &str = "posts";
/// Bucket holding profile pictures.
pub const AVATARS_BUCKET: &str = "avatars";
/// Messages per page when the caller does not choose.
pub const DEFAULT_MESSAGE_PAGE: usize = 50;

// == App Context ==
pub struct AppContext {
    config: Config,
    backend: Arc<dyn Backend>,
    cache: FreshnessCache,
    session: SessionHolder,
    feed: FeedSynchronizer,
    signer: SignedUrls,
    detections: DetectionQueue,
}

impl AppContext {
    /// Builds the context and starts its detection worker.
    ///
    /// Must be called inside a tokio runtime. The worker stops once the
    /// context is dropped.
    pub fn new(config: Config, backend: Arc<dyn Backend>, store: Arc<dyn KeyValueStore>) -> Self {
        let cache = FreshnessCache::new(store);
        let session = SessionHolder::new(backend.clone(), Duration::from_secs(config.auth_cache_secs));
        let feed = FeedSynchronizer::new(
            backend.clone(),
            cache.clone(),
            FeedScope::All,
            feed_settings(&config),
        );
        let signer = SignedUrls::new(backend.clone(), cache.clone());
        let (detections, receiver) = DetectionQueue::new();
        spawn_detection_worker(backend.clone(), receiver);

        Self {
            config,
            backend,
            cache,
            session,
            feed,
            signer,
            detections,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &FreshnessCache {
        &self.cache
    }

    pub fn session(&self) -> &SessionHolder {
        &self.session
    }

    /// The shared feed of all users' posts.
    pub fn feed(&self) -> &FeedSynchronizer {
        &self.feed
    }

    /// A separate feed restricted to one user's posts.
    pub fn user_feed(&self, user_id: &str) -> FeedSynchronizer {
        FeedSynchronizer::new(
            self.backend.clone(),
            self.cache.clone(),
            FeedScope::User(user_id.to_string()),
            feed_settings(&self.config),
        )
    }

    // == Lifecycle ==

    /// Starts token refresh and warms the cache for the signed-in user.
    ///
    /// Every prefetch failure is logged and skipped.
    pub async fn initialize(&self) {
        self.session.set_lifecycle(Lifecycle::Foreground).await;

        let user = match self.session.require_user().await {
            Ok(user) => user,
            Err(err) => {
                info!("Skipping prefetch: {}", err);
                return;
            }
        };

        match self.get_profile(&user.id).await {
            Ok(profile) => self.session.set_profile(Some(profile)).await,
            Err(err) => warn!("Prefetching profile failed: {}", err),
        }
        if let Err(err) = self.get_friends().await {
            warn!("Prefetching friends failed: {}", err);
        }
        if let Err(err) = self.feed.fetch(true).await {
            warn!("Prefetching feed failed: {}", err);
        }
        info!("Initialized for user {}", user.id);
    }

    pub async fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.session.set_lifecycle(lifecycle).await;
    }

    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Session> {
        self.invalidate_friends().await;
        let session = self.session.sign_up(email, password, name).await?;
        self.load_own_profile(&session.user.id).await;
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.invalidate_friends().await;
        let session = self.session.sign_in(email, password).await?;
        self.load_own_profile(&session.user.id).await;
        Ok(session)
    }

    /// Ends the session and forgets the friends list, which is not keyed by user.
    pub async fn sign_out(&self) -> Result<()> {
        self.invalidate_friends().await;
        self.session.sign_out().await
    }

    async fn load_own_profile(&self, user_id: &str) {
        match self.get_profile(user_id).await {
            Ok(profile) => self.session.set_profile(Some(profile)).await,
            Err(err) => warn!("Loading profile for {} failed: {}", user_id, err),
        }
    }

    /// Subscribes the shared feed to backend changes.
    pub async fn start_realtime(&self, channels: Vec<Channel>) -> Result<ListenerHandle> {
        let listener = RealtimeListener::new(
            self.backend.clone(),
            self.feed.clone(),
            Duration::from_secs(self.config.resubscribe_delay_secs),
        );
        listener.listen(channels).await
    }

    /// Detection results for one post as the detector completes them.
    pub async fn subscribe_post_detections(&self, post_id: i64) -> Result<DetectionUpdates> {
        DetectionUpdates::subscribe(
            self.backend.clone(),
            post_id,
            Duration::from_secs(self.config.resubscribe_delay_secs),
        )
        .await
    }

    /// Posts, incoming messages and incoming friend requests for the signed-in user.
    pub async fn default_channels(&self) -> Result<Vec<Channel>> {
        let user = self.session.require_user().await?;
        Ok(vec![
            Channel::Posts,
            Channel::Messages {
                receiver_id: user.id.clone(),
            },
            Channel::FriendRequests { friend_id: user.id },
        ])
    }

    // == Profiles ==

    /// Cached profile lookup; a missing profile is created with defaults.
    pub async fn get_profile(&self, user_id: &str) -> Result<Profile> {
        let key = keys::profile(user_id);
        if let Some(profile) = self.cache.get::<Profile>(&key).await? {
            return Ok(profile);
        }

        let profile = match self.backend.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(SyncError::NotFound(_)) => {
                info!("No profile for {}, creating default", user_id);
                self.backend.insert_profile(Profile::default_for(user_id)).await?
            }
            Err(err) => return Err(err),
        };
        self.cache.set(&key, &profile, self.config.cache_ttl).await?;
        Ok(profile)
    }

    /// Updates the profile and merges the change into the cached copy, if any.
    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let updated = self.backend.update_profile(user_id, update).await?;

        let key = keys::profile(user_id);
        if let Some(mut cached) = self.cache.get::<Profile>(&key).await? {
            cached.apply(update);
            self.cache.set(&key, &cached, self.config.cache_ttl).await?;
        }
        if self.session.user().await.is_some_and(|user| user.id == user_id) {
            self.session.set_profile(Some(updated.clone())).await;
        }
        Ok(updated)
    }

    /// Stores a new profile picture and points the profile at its public URL.
    pub async fn upload_avatar(&self, user_id: &str, image: Vec<u8>) -> Result<String> {
        let path = format!("{}/{}.jpg", user_id, Utc::now().timestamp_millis());
        let avatar_url = self.backend.upload_object(AVATARS_BUCKET, &path, image).await?;

        let update = ProfileUpdate {
            name: None,
            avatar_url: Some(avatar_url.clone()),
        };
        self.update_profile(user_id, &update).await?;
        info!("Uploaded avatar {} for {}", path, user_id);
        Ok(avatar_url)
    }

    // == Posts ==

    /// Signed URL for a public post image, or the URL itself when signing fails.
    pub async fn get_post_image_url(&self, image_url: &str, expires_in: Option<u64>) -> String {
        let expires_in = expires_in.unwrap_or(self.config.signed_url_expires_in);
        self.signer.sign_post_image(image_url, expires_in).await
    }

    /// Uploads the image, records the post and queues detection for it.
    pub async fn create_post(&self, image: Vec<u8>, caption: Option<&str>) -> Result<Post> {
        let user = self.session.require_user().await?;
        let path = format!("{}/{}.jpg", user.id, Utc::now().timestamp_millis());
        debug!("Uploading image {}", path);

        let image_url = self.backend.upload_object(POSTS_BUCKET, &path, image).await?;
        let post = self.backend.insert_post(&user.id, &image_url, caption).await?;

        self.detections.enqueue(DetectionJob {
            post_id: post.id,
            image_url,
        });
        self.invalidate_feeds().await;
        info!("Created post {} for {}", post.id, user.id);
        Ok(post)
    }

    pub async fn like_post(&self, post_id: i64) -> Result<Post> {
        let post = self.backend.increment_likes(post_id).await?;
        self.feed.update_local(post.clone()).await;
        self.invalidate_feeds().await;
        Ok(post)
    }

    /// Soft-deletes the post and drops it from the local feed.
    pub async fn delete_post(&self, post_id: i64) -> Result<Post> {
        let post = self.backend.soft_delete_post(post_id).await?;
        self.feed.remove_local(post_id).await;
        self.invalidate_feeds().await;
        Ok(post)
    }

    async fn invalidate_feeds(&self) {
        if let Err(err) = self.cache.invalidate_prefix(keys::FEED_PREFIX).await {
            warn!("Failed to invalidate cached feed pages: {}", err);
        }
    }

    // == Friends ==

    /// Accepted friendships of the signed-in user.
    pub async fn get_friends(&self) -> Result<Vec<Friend>> {
        let user = self.session.require_user().await?;
        if let Some(friends) = self.cache.get::<Vec<Friend>>(keys::FRIENDS_KEY).await? {
            return Ok(friends);
        }

        let friends = self.backend.fetch_friends(&user.id, FriendStatus::Accepted).await?;
        self.cache
            .set(keys::FRIENDS_KEY, &friends, self.config.cache_ttl)
            .await?;
        Ok(friends)
    }

    /// Pending requests addressed to the signed-in user.
    pub async fn get_friend_requests(&self) -> Result<Vec<Friend>> {
        let user = self.session.require_user().await?;
        self.backend.fetch_friend_requests(&user.id).await
    }

    pub async fn send_friend_request(&self, friend_id: &str) -> Result<Friend> {
        let user = self.session.require_user().await?;
        if user.id == friend_id {
            return Err(SyncError::InvalidRequest(
                "Cannot send a friend request to yourself".to_string(),
            ));
        }
        if self.backend.find_friendship(&user.id, friend_id).await?.is_some() {
            return Err(SyncError::AlreadyExists("Friend request".to_string()));
        }

        let request = self.backend.insert_friend_request(&user.id, friend_id).await?;
        self.invalidate_friends().await;
        Ok(request)
    }

    pub async fn accept_friend_request(&self, request_id: i64) -> Result<Friend> {
        let friend = self
            .backend
            .update_friend_status(request_id, FriendStatus::Accepted)
            .await?;
        self.invalidate_friends().await;
        Ok(friend)
    }

    pub async fn reject_friend_request(&self, request_id: i64) -> Result<Friend> {
        let friend = self.backend.delete_friendship(request_id).await?;
        self.invalidate_friends().await;
        Ok(friend)
    }

    pub async fn remove_friend(&self, friendship_id: i64) -> Result<Friend> {
        let friend = self.backend.delete_friendship(friendship_id).await?;
        self.invalidate_friends().await;
        Ok(friend)
    }

    async fn invalidate_friends(&self) {
        if let Err(err) = self.cache.invalidate(keys::FRIENDS_KEY).await {
            warn!("Failed to invalidate friends list: {}", err);
        }
    }

    // == Messages ==

    /// One cached page of the conversation with `other`, newest first.
    pub async fn get_messages(&self, other: &str, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let user = self.session.require_user().await?;
        let key = keys::messages_page(&user.id, other, limit, offset);
        if let Some(messages) = self.cache.get::<Vec<Message>>(&key).await? {
            return Ok(messages);
        }

        let messages = self.backend.fetch_messages(&user.id, other, limit, offset).await?;
        self.cache.set(&key, &messages, self.config.cache_ttl).await?;
        Ok(messages)
    }

    pub async fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message> {
        let user = self.session.require_user().await?;
        if content.trim().is_empty() {
            return Err(SyncError::InvalidRequest("Message cannot be empty".to_string()));
        }

        let message = self.backend.insert_message(&user.id, receiver_id, content).await?;
        let prefix = keys::conversation_prefix(&user.id, receiver_id);
        if let Err(err) = self.cache.invalidate_prefix(&prefix).await {
            warn!("Failed to invalidate conversation cache: {}", err);
        }
        Ok(message)
    }

    /// Marks messages read; failures are logged and reported as `false`.
    pub async fn mark_messages_read(&self, ids: &[i64]) -> bool {
        if ids.is_empty() {
            return true;
        }
        match self.backend.mark_messages_read(ids).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Error marking messages as read: {}", err);
                false
            }
        }
    }

    // == Premium ==

    /// Active subscription of the signed-in user, `None` when absent or on error.
    pub async fn check_premium_status(&self) -> Option<PremiumUser> {
        match self.premium_status().await {
            Ok(status) => status,
            Err(err) => {
                warn!("Error checking premium status: {}", err);
                None
            }
        }
    }

    async fn premium_status(&self) -> Result<Option<PremiumUser>> {
        let user = self.session.require_user().await?;
        let key = keys::premium(&user.id);
        if let Some(premium) = self.cache.get::<PremiumUser>(&key).await? {
            return Ok(Some(premium));
        }

        let premium = self.backend.fetch_active_premium(&user.id).await?;
        if let Some(premium) = &premium {
            self.cache
                .set(&key, premium, self.config.premium_cache_ttl)
                .await?;
        }
        Ok(premium)
    }

    // == Cache ==

    /// Drops every cached entry this crate owns.
    pub async fn clear_cache(&self) -> Result<usize> {
        let removed = self.cache.clear_namespaces().await?;
        info!("Cleared {} cached entries", removed);
        Ok(removed)
    }
}

fn feed_settings(config: &Config) -> FeedSettings {
    FeedSettings {
        page_size: config.feed_page_size,
        cache_ttl: config.cache_ttl,
        signed_url_expires_in: config.signed_url_expires_in,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cache::MemoryStore;
    use crate::models::DetectionStatus;
    use serde_json::json;

    fn context(backend: Arc<InMemoryBackend>) -> AppContext {
        let config = Config {
            auth_cache_secs: 0,
            ..Config::default()
        };
        AppContext::new(config, backend, Arc::new(MemoryStore::new()))
    }

    async fn signed_in(user_id: &str) -> (Arc<InMemoryBackend>, AppContext) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.sign_in_as(user_id).await;
        let ctx = context(backend.clone());
        (backend, ctx)
    }

    #[tokio::test]
    async fn test_get_profile_creates_default() {
        let (backend, ctx) = signed_in("u1").await;

        let profile = ctx.get_profile("u1").await.unwrap();
        assert_eq!(profile.name, crate::models::DEFAULT_PROFILE_NAME);
        assert_eq!(backend.fetch_profile("u1").await.unwrap().id, "u1");
        assert!(ctx
            .cache()
            .get::<Profile>(&keys::profile("u1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_update_profile_merges_cached_copy() {
        let (_backend, ctx) = signed_in("u1").await;
        ctx.get_profile("u1").await.unwrap();

        let update = ProfileUpdate {
            name: Some("Mochi".to_string()),
            avatar_url: None,
        };
        ctx.update_profile("u1", &update).await.unwrap();

        let cached: Profile = ctx
            .cache()
            .get(&keys::profile("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.name, "Mochi");
        assert_eq!(ctx.get_profile("u1").await.unwrap().name, "Mochi");
    }

    #[tokio::test]
    async fn test_upload_avatar_updates_cached_profile() {
        let (backend, ctx) = signed_in("u1").await;
        ctx.session().require_user().await.unwrap();
        ctx.get_profile("u1").await.unwrap();

        let url = ctx.upload_avatar("u1", vec![7, 7]).await.unwrap();
        let path = url.split("/public/avatars/").nth(1).unwrap();
        assert!(path.starts_with("u1/"));
        assert!(backend.has_object(AVATARS_BUCKET, path).await);

        assert_eq!(ctx.get_profile("u1").await.unwrap().avatar_url.as_deref(), Some(url.as_str()));
        assert_eq!(
            ctx.session().profile().await.unwrap().avatar_url.as_deref(),
            Some(url.as_str())
        );

        let empty = ctx.upload_avatar("u1", Vec::new()).await;
        assert!(matches!(empty, Err(SyncError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_create_post_requires_user() {
        let backend = Arc::new(InMemoryBackend::new());
        let ctx = context(backend);

        let result = ctx.create_post(vec![1, 2, 3], None).await;
        assert!(matches!(result, Err(SyncError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_create_post_uploads_and_queues_detection() {
        let (backend, ctx) = signed_in("u1").await;
        ctx.cache()
            .set(&keys::feed_page(&FeedScope::All, 10, 0), &Vec::<Post>::new(), 300)
            .await
            .unwrap();

        let post = ctx.create_post(vec![0xff, 0xd8], Some("loaf")).await.unwrap();
        assert_eq!(post.caption.as_deref(), Some("loaf"));
        let location = crate::storage::extract_file_path(&post.image_url).unwrap();
        assert_eq!(location.bucket, POSTS_BUCKET);
        assert!(backend.has_object(&location.bucket, &location.path).await);

        // Feed pages were invalidated.
        let page: Option<Vec<Post>> = ctx
            .cache()
            .get(&keys::feed_page(&FeedScope::All, 10, 0))
            .await
            .unwrap();
        assert!(page.is_none());

        let mut queued = false;
        for _ in 0..50 {
            let detections = backend.detections().await;
            if detections.iter().any(|d| d.post_id == post.id) {
                assert_eq!(detections[0].status, DetectionStatus::Pending);
                queued = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queued);
    }

    #[tokio::test]
    async fn test_delete_post_removes_from_feed() {
        let (backend, ctx) = signed_in("u1").await;
        let posts = backend.seed_posts("u1", 3).await;
        ctx.feed().fetch(true).await.unwrap();

        ctx.delete_post(posts[0].id).await.unwrap();

        let snapshot = ctx.feed().snapshot().await;
        assert_eq!(snapshot.items.len(), 2);
        assert!(snapshot.items.iter().all(|p| p.id != posts[0].id));
    }

    #[tokio::test]
    async fn test_like_post_updates_feed() {
        let (backend, ctx) = signed_in("u1").await;
        let posts = backend.seed_posts("u1", 1).await;
        ctx.feed().fetch(true).await.unwrap();

        let liked = ctx.like_post(posts[0].id).await.unwrap();
        assert_eq!(liked.likes, 1);
        assert_eq!(ctx.feed().snapshot().await.items[0].likes, 1);
    }

    #[tokio::test]
    async fn test_friend_request_rejects_duplicates_both_ways() {
        let (backend, ctx) = signed_in("u1").await;
        backend.insert_friend_request("u2", "u1").await.unwrap();

        let result = ctx.send_friend_request("u2").await;
        assert!(matches!(result, Err(SyncError::AlreadyExists(_))));

        let result = ctx.send_friend_request("u1").await;
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_friends_list_cached_until_mutation() {
        let (backend, ctx) = signed_in("u1").await;
        assert!(ctx.get_friends().await.unwrap().is_empty());

        // A change behind the cache's back stays invisible...
        let outgoing = backend.insert_friend_request("u1", "u2").await.unwrap();
        backend
            .update_friend_status(outgoing.id, FriendStatus::Accepted)
            .await
            .unwrap();
        assert!(ctx.get_friends().await.unwrap().is_empty());

        // ...until a mutation through the context invalidates the list.
        let incoming = backend.insert_friend_request("u3", "u1").await.unwrap();
        ctx.reject_friend_request(incoming.id).await.unwrap();
        assert_eq!(ctx.get_friends().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_friends_not_shared_across_accounts() {
        let backend = Arc::new(InMemoryBackend::new());
        let ctx = context(backend.clone());
        let first = ctx.sign_up("a@x.io", "pw", "A").await.unwrap();
        let request = backend.insert_friend_request(&first.user.id, "zed").await.unwrap();
        backend
            .update_friend_status(request.id, FriendStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(ctx.get_friends().await.unwrap().len(), 1);

        ctx.sign_out().await.unwrap();
        assert!(matches!(ctx.get_friends().await, Err(SyncError::NotAuthenticated)));

        ctx.sign_up("b@x.io", "pw", "B").await.unwrap();
        assert!(ctx.get_friends().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accept_friend_request() {
        let (backend, ctx) = signed_in("u1").await;
        let request = backend.insert_friend_request("u2", "u1").await.unwrap();
        assert_eq!(ctx.get_friend_requests().await.unwrap().len(), 1);

        let accepted = ctx.accept_friend_request(request.id).await.unwrap();
        assert_eq!(accepted.status, FriendStatus::Accepted);
        assert!(ctx.get_friend_requests().await.unwrap().is_empty());

        ctx.remove_friend(request.id).await.unwrap();
        assert!(backend.find_friendship("u1", "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_message_invalidates_conversation() {
        let (_backend, ctx) = signed_in("u1").await;
        assert!(ctx.get_messages("u2", DEFAULT_MESSAGE_PAGE, 0).await.unwrap().is_empty());

        ctx.send_message("u2", "meow").await.unwrap();

        let messages = ctx.get_messages("u2", DEFAULT_MESSAGE_PAGE, 0).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "meow");
        assert!(ctx.mark_messages_read(&[messages[0].id]).await);
    }

    #[tokio::test]
    async fn test_premium_status() {
        let (backend, ctx) = signed_in("u1").await;
        assert!(ctx.check_premium_status().await.is_none());

        backend.seed_premium("u1").await;
        let premium = ctx.check_premium_status().await.unwrap();
        assert_eq!(premium.user_id, "u1");
        assert!(ctx
            .cache()
            .get::<PremiumUser>(&keys::premium("u1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_premium_status_signed_out_is_none() {
        let ctx = context(Arc::new(InMemoryBackend::new()));
        assert!(ctx.check_premium_status().await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_prefetches() {
        let (backend, ctx) = signed_in("u1").await;
        backend.seed_posts("u2", 12).await;

        ctx.initialize().await;

        assert!(backend.auto_refresh().await);
        assert_eq!(ctx.session().profile().await.unwrap().id, "u1");
        assert_eq!(ctx.feed().snapshot().await.items.len(), 10);
        assert!(ctx
            .cache()
            .get::<Vec<Friend>>(keys::FRIENDS_KEY)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_initialize_survives_feed_failure() {
        let (backend, ctx) = signed_in("u1").await;
        backend.fail_next_fetches(1).await;

        ctx.initialize().await;

        assert!(ctx.session().profile().await.is_some());
        assert!(ctx.feed().snapshot().await.items.is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_loads_profile() {
        let ctx = context(Arc::new(InMemoryBackend::new()));
        let session = ctx.sign_up("cat@x.io", "pw", "Tama").await.unwrap();

        let profile = ctx.session().profile().await.unwrap();
        assert_eq!(profile.id, session.user.id);
        assert_eq!(profile.name, "Tama");

        ctx.sign_out().await.unwrap();
        assert!(ctx.session().profile().await.is_none());
        ctx.sign_in("cat@x.io", "pw").await.unwrap();
        assert!(ctx.session().profile().await.is_some());
    }

    #[tokio::test]
    async fn test_clear_cache_counts_entries() {
        let (_backend, ctx) = signed_in("u1").await;
        ctx.get_profile("u1").await.unwrap();
        ctx.get_friends().await.unwrap();

        assert_eq!(ctx.clear_cache().await.unwrap(), 2);
        assert_eq!(ctx.clear_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_user_feed_only_holds_own_posts() {
        let (backend, ctx) = signed_in("u1").await;
        backend.seed_posts("u1", 2).await;
        backend.seed_posts("u2", 3).await;

        let feed = ctx.user_feed("u2");
        feed.fetch(true).await.unwrap();

        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.total_count, 3);
        assert!(snapshot.items.iter().all(|p| p.user_id == "u2"));
    }

    #[tokio::test]
    async fn test_post_image_url_falls_back_to_original() {
        let (backend, ctx) = signed_in("u1").await;
        let post = backend.seed_posts("u1", 1).await.remove(0);

        let signed = ctx.get_post_image_url(&post.image_url, None).await;
        assert_ne!(signed, post.image_url);
        assert!(signed.contains("token="));
        assert_eq!(ctx.get_post_image_url(&post.image_url, Some(60)).await, signed);

        let foreign = "https://cdn.example.com/cat.jpg";
        assert_eq!(ctx.get_post_image_url(foreign, None).await, foreign);
    }

    #[tokio::test]
    async fn test_realtime_resyncs_shared_feed() {
        let (backend, ctx) = signed_in("u1").await;
        let handle = ctx.start_realtime(ctx.default_channels().await.unwrap()).await.unwrap();
        assert_eq!(handle.channel_count(), 3);

        ctx.create_post(vec![1], None).await.unwrap();

        let mut synced = false;
        for _ in 0..50 {
            if ctx.feed().snapshot().await.items.len() == 1 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced);
        assert!(backend.fetch_calls().await >= 1);
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_new_post_detection_result_arrives() {
        let (backend, ctx) = signed_in("u1").await;
        let post = ctx.create_post(vec![1, 2], None).await.unwrap();
        let mut updates = ctx.subscribe_post_detections(post.id).await.unwrap();

        // The worker records the pending row asynchronously.
        let mut recorded = false;
        for _ in 0..50 {
            if backend.complete_detection(post.id, json!({"cats": 1})).await.is_ok() {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(recorded);

        let detection = updates.next().await.unwrap();
        assert_eq!(detection.status, DetectionStatus::Completed);
        assert_eq!(detection.result, Some(json!({"cats": 1})));

        let stored = backend.fetch_posts(10, 0, Some("u1")).await.unwrap().posts;
        assert_eq!(stored[0].detection_result, Some(json!({"cats": 1})));
        updates.unsubscribe();
    }

    #[tokio::test]
    async fn test_default_channels_for_user() {
        let (_backend, ctx) = signed_in("u1").await;
        let names: Vec<String> = ctx
            .default_channels()
            .await
            .unwrap()
            .iter()
            .map(Channel::name)
            .collect();
        assert_eq!(names, vec!["posts", "messages", "friend-requests"]);
    }
}
