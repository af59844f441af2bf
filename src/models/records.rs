//! Backend records
//!
//! Rows as the hosted backend returns them. All records serialize to the same
//! JSON shape they are cached under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name given to profiles created on first lookup.
pub const DEFAULT_PROFILE_NAME: &str = "New User";

// == Auth ==
/// Signed-in user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// Backend session for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

// == Profile ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Profile inserted when a user has none yet.
    pub fn default_for(user_id: impl Into<String>) -> Self {
        Self {
            id: user_id.into(),
            name: DEFAULT_PROFILE_NAME.to_string(),
            avatar_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(avatar_url) = &update.avatar_url {
            self.avatar_url = Some(avatar_url.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

// == Post ==
/// A shared photo. Deleting a post only flips `deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: String,
    pub image_url: String,
    pub caption: Option<String>,
    pub likes: u64,
    pub detection_result: Option<serde_json::Value>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    /// Owner profile, when the backend embeds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profile>,
}

// == Friends ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: i64,
    pub user_id: String,
    pub friend_id: String,
    pub status: FriendStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profile>,
}

impl Friend {
    /// True when this row links `a` and `b` in either direction.
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.user_id == a && self.friend_id == b) || (self.user_id == b && self.friend_id == a)
    }
}

// == Messages ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// True when the message belongs to the conversation between `a` and `b`.
    pub fn between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

// == Detection ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Pending,
    Completed,
    Failed,
}

/// Cat detection job row, created pending after every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,
    pub post_id: i64,
    pub image_url: String,
    pub status: DetectionStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// == Premium ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumUser {
    pub id: i64,
    pub user_id: String,
    pub active: bool,
    pub subscription_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
