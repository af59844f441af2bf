//! In-process backend
//!
//! Complete [`Backend`] over in-memory tables. Backs the local gateway and the
//! test suites, and supports fault injection for the failure paths.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::models::{
    Detection, DetectionStatus, Friend, FriendStatus, Message, Post, PostBatch, PremiumUser,
    Profile, ProfileUpdate, Session, User,
};
use crate::realtime::{ChangeEvent, ChangeKind, Channel, ChannelMessage, ChannelStatus, Subscription};

const STORAGE_BASE: &str = "https://backend.local/storage/v1/object";

/// Initial table contents, loadable from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub session: Option<Session>,
    pub profiles: Vec<Profile>,
    pub posts: Vec<Post>,
    pub friends: Vec<Friend>,
    pub messages: Vec<Message>,
    pub premium_users: Vec<PremiumUser>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_fetches: usize,
    fetch_delays: VecDeque<Duration>,
    failing_subscribes: usize,
    failing_signed_urls: bool,
}

#[derive(Debug, Default)]
struct Tables {
    session: Option<Session>,
    accounts: HashMap<String, (String, User)>,
    auto_refresh: bool,
    profiles: HashMap<String, Profile>,
    posts: Vec<Post>,
    friends: Vec<Friend>,
    messages: Vec<Message>,
    detections: Vec<Detection>,
    premium_users: Vec<PremiumUser>,
    objects: HashMap<String, Vec<u8>>,
    subscribers: Vec<(Channel, mpsc::UnboundedSender<ChannelMessage>)>,
    next_id: i64,
    signatures: u64,
    fetch_calls: usize,
    subscribe_calls: usize,
    faults: Faults,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn publish(&mut self, table: &str, kind: ChangeKind, record: Value) {
        self.subscribers.retain(|(channel, tx)| {
            if !channel.matches(table, kind, &record) {
                return !tx.is_closed();
            }
            let event = ChangeEvent {
                table: table.to_string(),
                kind,
                record: record.clone(),
            };
            tx.send(ChannelMessage::Change(event)).is_ok()
        });
    }
}

// == In-Memory Backend ==
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let next_id = seed
            .posts
            .iter()
            .map(|p| p.id)
            .chain(seed.friends.iter().map(|f| f.id))
            .chain(seed.messages.iter().map(|m| m.id))
            .chain(seed.premium_users.iter().map(|p| p.id))
            .max()
            .unwrap_or(0);

        let tables = Tables {
            session: seed.session,
            profiles: seed.profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            posts: seed.posts,
            friends: seed.friends,
            messages: seed.messages,
            premium_users: seed.premium_users,
            next_id,
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    // == Test and fixture hooks ==

    /// Installs a session for `user_id` without going through sign-in.
    pub async fn sign_in_as(&self, user_id: &str) -> Session {
        let session = new_session(User {
            id: user_id.to_string(),
            email: format!("{}@pawket.local", user_id),
        });
        self.tables.lock().await.session = Some(session.clone());
        session
    }

    /// Inserts `count` posts owned by `user_id` with ascending creation times.
    pub async fn seed_posts(&self, user_id: &str, count: usize) -> Vec<Post> {
        let mut tables = self.tables.lock().await;
        let base = Utc::now() - chrono::Duration::hours(1);
        (0..count)
            .map(|i| {
                let id = tables.next_id();
                let post = Post {
                    id,
                    user_id: user_id.to_string(),
                    image_url: format!("{}/public/posts/{}/{}.jpg", STORAGE_BASE, user_id, id),
                    caption: Some(format!("cat #{}", id)),
                    likes: 0,
                    detection_result: None,
                    deleted: false,
                    created_at: base + chrono::Duration::seconds(i as i64),
                    profiles: None,
                };
                tables.posts.push(post.clone());
                post
            })
            .collect()
    }

    pub async fn seed_premium(&self, user_id: &str) -> PremiumUser {
        let mut tables = self.tables.lock().await;
        let premium = PremiumUser {
            id: tables.next_id(),
            user_id: user_id.to_string(),
            active: true,
            subscription_id: format!("sub_{}", user_id),
            expires_at: Utc::now() + chrono::Duration::days(30),
            created_at: Utc::now(),
        };
        tables.premium_users.push(premium.clone());
        premium
    }

    /// Makes the next `count` post fetches fail with a network error.
    pub async fn fail_next_fetches(&self, count: usize) {
        self.tables.lock().await.faults.failing_fetches = count;
    }

    /// Delays the next post fetch by `delay`; queued delays apply in call order.
    pub async fn push_fetch_delay(&self, delay: Duration) {
        self.tables.lock().await.faults.fetch_delays.push_back(delay);
    }

    /// Makes the next `count` subscribe calls fail.
    pub async fn fail_next_subscribes(&self, count: usize) {
        self.tables.lock().await.faults.failing_subscribes = count;
    }

    pub async fn fail_signed_urls(&self, failing: bool) {
        self.tables.lock().await.faults.failing_signed_urls = failing;
    }

    /// Reports a channel error to every subscriber of the named channel.
    pub async fn emit_channel_error(&self, channel_name: &str) {
        let mut tables = self.tables.lock().await;
        tables.subscribers.retain(|(channel, tx)| {
            if channel.name() != channel_name {
                return !tx.is_closed();
            }
            let status = ChannelStatus::ChannelError("connection lost".to_string());
            tx.send(ChannelMessage::Status(status)).is_ok()
        });
    }

    /// Marks a detection completed, copies the result onto the post and
    /// notifies the post's detection channel.
    pub async fn complete_detection(&self, post_id: i64, result: Value) -> Result<Detection> {
        let mut tables = self.tables.lock().await;
        let detection = tables
            .detections
            .iter_mut()
            .find(|d| d.post_id == post_id)
            .ok_or_else(|| SyncError::NotFound(format!("detection for post {}", post_id)))?;
        detection.status = DetectionStatus::Completed;
        detection.result = Some(result.clone());
        let detection = detection.clone();
        if let Some(post) = tables.posts.iter_mut().find(|p| p.id == post_id) {
            post.detection_result = Some(result);
        }
        let record = serde_json::to_value(&detection)?;
        tables.publish("detections", ChangeKind::Update, record);
        Ok(detection)
    }

    pub async fn fetch_calls(&self) -> usize {
        self.tables.lock().await.fetch_calls
    }

    pub async fn subscribe_calls(&self) -> usize {
        self.tables.lock().await.subscribe_calls
    }

    pub async fn detections(&self) -> Vec<Detection> {
        self.tables.lock().await.detections.clone()
    }

    pub async fn auto_refresh(&self) -> bool {
        self.tables.lock().await.auto_refresh
    }

    pub async fn has_object(&self, bucket: &str, path: &str) -> bool {
        self.tables
            .lock()
            .await
            .objects
            .contains_key(&format!("{}/{}", bucket, path))
    }
}

fn new_session(user: User) -> Session {
    Session {
        access_token: format!("token-{}-{}", user.id, Utc::now().timestamp_millis()),
        user,
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

fn not_found(what: impl std::fmt::Display) -> SyncError {
    SyncError::NotFound(what.to_string())
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.session.clone())
    }

    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Session> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(email) {
            return Err(SyncError::AlreadyExists(format!("Account {}", email)));
        }
        let id = format!("user-{}", tables.next_id());
        let user = User {
            id: id.clone(),
            email: email.to_string(),
        };
        tables
            .accounts
            .insert(email.to_string(), (password.to_string(), user.clone()));
        let mut profile = Profile::default_for(id.clone());
        profile.name = name.to_string();
        tables.profiles.insert(id, profile);

        let session = new_session(user);
        tables.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session> {
        let mut tables = self.tables.lock().await;
        let user = match tables.accounts.get(email) {
            Some((stored, user)) if stored == password => user.clone(),
            _ => return Err(SyncError::Backend("Invalid login credentials".to_string())),
        };
        let session = new_session(user);
        tables.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.tables.lock().await.session = None;
        Ok(())
    }

    async fn set_auto_refresh(&self, enabled: bool) {
        self.tables.lock().await.auto_refresh = enabled;
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        self.tables
            .lock()
            .await
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found(format!("profile {}", user_id)))
    }

    async fn insert_profile(&self, profile: Profile) -> Result<Profile> {
        let mut tables = self.tables.lock().await;
        if tables.profiles.contains_key(&profile.id) {
            return Err(SyncError::AlreadyExists(format!("Profile {}", profile.id)));
        }
        tables.profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| not_found(format!("profile {}", user_id)))?;
        profile.apply(update);
        Ok(profile.clone())
    }

    async fn upload_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String> {
        if bytes.is_empty() {
            return Err(SyncError::InvalidRequest("Empty upload".to_string()));
        }
        let mut tables = self.tables.lock().await;
        tables.objects.insert(format!("{}/{}", bucket, path), bytes);
        Ok(format!("{}/public/{}/{}", STORAGE_BASE, bucket, path))
    }

    async fn create_signed_url(&self, bucket: &str, path: &str, expires_in: u64) -> Result<String> {
        let mut tables = self.tables.lock().await;
        if tables.faults.failing_signed_urls {
            return Err(SyncError::Backend("signing unavailable".to_string()));
        }
        tables.signatures += 1;
        Ok(format!(
            "{}/sign/{}/{}?token=sig{}&expires_in={}",
            STORAGE_BASE, bucket, path, tables.signatures, expires_in
        ))
    }

    async fn fetch_posts(&self, limit: usize, offset: usize, user_id: Option<&str>) -> Result<PostBatch> {
        let delay = {
            let mut tables = self.tables.lock().await;
            tables.fetch_calls += 1;
            if tables.faults.failing_fetches > 0 {
                tables.faults.failing_fetches -= 1;
                return Err(SyncError::Network("fetch failed".to_string()));
            }
            tables.faults.fetch_delays.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let tables = self.tables.lock().await;
        let mut visible: Vec<&Post> = tables
            .posts
            .iter()
            .filter(|p| !p.deleted)
            .filter(|p| user_id.map_or(true, |uid| p.user_id == uid))
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let count = visible.len();
        let posts = visible
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|post| {
                let mut post = post.clone();
                post.profiles = tables.profiles.get(&post.user_id).cloned();
                post
            })
            .collect();
        debug!("fetch_posts limit={} offset={} count={}", limit, offset, count);
        Ok(PostBatch { posts, count })
    }

    async fn insert_post(&self, user_id: &str, image_url: &str, caption: Option<&str>) -> Result<Post> {
        let mut tables = self.tables.lock().await;
        let post = Post {
            id: tables.next_id(),
            user_id: user_id.to_string(),
            image_url: image_url.to_string(),
            caption: caption.map(str::to_string),
            likes: 0,
            detection_result: None,
            deleted: false,
            created_at: Utc::now(),
            profiles: None,
        };
        tables.posts.push(post.clone());
        let record = serde_json::to_value(&post)?;
        tables.publish("posts", ChangeKind::Insert, record);
        Ok(post)
    }

    async fn increment_likes(&self, post_id: i64) -> Result<Post> {
        let mut tables = self.tables.lock().await;
        let post = tables
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| not_found(format!("post {}", post_id)))?;
        post.likes += 1;
        Ok(post.clone())
    }

    async fn soft_delete_post(&self, post_id: i64) -> Result<Post> {
        let mut tables = self.tables.lock().await;
        let post = tables
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| not_found(format!("post {}", post_id)))?;
        post.deleted = true;
        Ok(post.clone())
    }

    async fn fetch_friends(&self, user_id: &str, status: FriendStatus) -> Result<Vec<Friend>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .friends
            .iter()
            .filter(|f| f.user_id == user_id && f.status == status)
            .map(|f| {
                let mut f = f.clone();
                f.profiles = tables.profiles.get(&f.friend_id).cloned();
                f
            })
            .collect())
    }

    async fn fetch_friend_requests(&self, user_id: &str) -> Result<Vec<Friend>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .friends
            .iter()
            .filter(|f| f.friend_id == user_id && f.status == FriendStatus::Pending)
            .map(|f| {
                let mut f = f.clone();
                f.profiles = tables.profiles.get(&f.user_id).cloned();
                f
            })
            .collect())
    }

    async fn find_friendship(&self, a: &str, b: &str) -> Result<Option<Friend>> {
        let tables = self.tables.lock().await;
        Ok(tables.friends.iter().find(|f| f.links(a, b)).cloned())
    }

    async fn insert_friend_request(&self, user_id: &str, friend_id: &str) -> Result<Friend> {
        let mut tables = self.tables.lock().await;
        let friend = Friend {
            id: tables.next_id(),
            user_id: user_id.to_string(),
            friend_id: friend_id.to_string(),
            status: FriendStatus::Pending,
            created_at: Utc::now(),
            profiles: None,
        };
        tables.friends.push(friend.clone());
        let record = serde_json::to_value(&friend)?;
        tables.publish("friends", ChangeKind::Insert, record);
        Ok(friend)
    }

    async fn update_friend_status(&self, id: i64, status: FriendStatus) -> Result<Friend> {
        let mut tables = self.tables.lock().await;
        let friend = tables
            .friends
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| not_found(format!("friendship {}", id)))?;
        friend.status = status;
        Ok(friend.clone())
    }

    async fn delete_friendship(&self, id: i64) -> Result<Friend> {
        let mut tables = self.tables.lock().await;
        let index = tables
            .friends
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| not_found(format!("friendship {}", id)))?;
        Ok(tables.friends.remove(index))
    }

    async fn fetch_messages(&self, me: &str, other: &str, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let tables = self.tables.lock().await;
        let mut conversation: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.between(me, other))
            .cloned()
            .collect();
        conversation.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(conversation.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        let mut tables = self.tables.lock().await;
        let message = Message {
            id: tables.next_id(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            read: false,
        };
        tables.messages.push(message.clone());
        let record = serde_json::to_value(&message)?;
        tables.publish("messages", ChangeKind::Insert, record);
        Ok(message)
    }

    async fn mark_messages_read(&self, ids: &[i64]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        for message in tables.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.read = true;
        }
        Ok(())
    }

    async fn insert_detection(&self, post_id: i64, image_url: &str) -> Result<Detection> {
        let mut tables = self.tables.lock().await;
        if !tables.posts.iter().any(|p| p.id == post_id) {
            return Err(not_found(format!("post {}", post_id)));
        }
        let detection = Detection {
            id: tables.next_id(),
            post_id,
            image_url: image_url.to_string(),
            status: DetectionStatus::Pending,
            result: None,
            created_at: Utc::now(),
        };
        tables.detections.push(detection.clone());
        Ok(detection)
    }

    async fn fetch_active_premium(&self, user_id: &str) -> Result<Option<PremiumUser>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .premium_users
            .iter()
            .find(|p| p.user_id == user_id && p.active)
            .cloned())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<Subscription> {
        let mut tables = self.tables.lock().await;
        tables.subscribe_calls += 1;
        if tables.faults.failing_subscribes > 0 {
            tables.faults.failing_subscribes -= 1;
            return Err(SyncError::ChannelClosed(channel.name()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, send cannot fail here.
        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        tables.subscribers.push((channel.clone(), tx));
        Ok(Subscription::new(channel.clone(), rx))
    }
}
