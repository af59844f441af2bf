//! Backend Module
//!
//! The hosted backend-as-a-service seen as a black box: auth, table rows,
//! object storage and realtime channels. The sync layer only ever talks to
//! it through [`Backend`].

mod memory;

pub use memory::{InMemoryBackend, Seed};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Detection, Friend, FriendStatus, Message, PostBatch, PremiumUser, Profile, ProfileUpdate,
    Post, Session,
};
use crate::realtime::{Channel, Subscription};

/// Operations the client needs from the hosted backend.
///
/// Not-found lookups return [`crate::error::SyncError::NotFound`].
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // -- auth --
    async fn get_session(&self) -> Result<Option<Session>>;
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Session>;
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_out(&self) -> Result<()>;
    /// Starts or stops background token refresh.
    async fn set_auto_refresh(&self, enabled: bool);

    // -- profiles --
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile>;
    async fn insert_profile(&self, profile: Profile) -> Result<Profile>;
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile>;

    // -- storage --
    /// Uploads an object and returns its public URL.
    async fn upload_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String>;
    async fn create_signed_url(&self, bucket: &str, path: &str, expires_in: u64) -> Result<String>;

    // -- posts --
    /// Newest-first page of non-deleted posts, optionally for one user, with the total count.
    async fn fetch_posts(&self, limit: usize, offset: usize, user_id: Option<&str>) -> Result<PostBatch>;
    async fn insert_post(&self, user_id: &str, image_url: &str, caption: Option<&str>) -> Result<Post>;
    async fn increment_likes(&self, post_id: i64) -> Result<Post>;
    async fn soft_delete_post(&self, post_id: i64) -> Result<Post>;

    // -- friends --
    async fn fetch_friends(&self, user_id: &str, status: FriendStatus) -> Result<Vec<Friend>>;
    /// Pending requests addressed to `user_id`.
    async fn fetch_friend_requests(&self, user_id: &str) -> Result<Vec<Friend>>;
    /// Any friendship row linking the two users, in either direction.
    async fn find_friendship(&self, a: &str, b: &str) -> Result<Option<Friend>>;
    async fn insert_friend_request(&self, user_id: &str, friend_id: &str) -> Result<Friend>;
    async fn update_friend_status(&self, id: i64, status: FriendStatus) -> Result<Friend>;
    async fn delete_friendship(&self, id: i64) -> Result<Friend>;

    // -- messages --
    /// Newest-first page of the conversation between `me` and `other`.
    async fn fetch_messages(&self, me: &str, other: &str, limit: usize, offset: usize) -> Result<Vec<Message>>;
    async fn insert_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message>;
    async fn mark_messages_read(&self, ids: &[i64]) -> Result<()>;

    // -- detection and premium --
    async fn insert_detection(&self, post_id: i64, image_url: &str) -> Result<Detection>;
    async fn fetch_active_premium(&self, user_id: &str) -> Result<Option<PremiumUser>>;

    // -- realtime --
    async fn subscribe(&self, channel: &Channel) -> Result<Subscription>;
}
