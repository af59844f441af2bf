//! Realtime channel types
//!
//! A channel is a filtered stream of row changes from the backend. The
//! backend delivers both change events and status transitions on the same
//! subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Kind of row change a channel listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A change-notification channel and its event filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// New posts from anyone
    Posts,
    /// New messages addressed to `receiver_id`
    Messages { receiver_id: String },
    /// New friend requests addressed to `friend_id`
    FriendRequests { friend_id: String },
    /// Detection updates for one post
    PostDetections { post_id: i64 },
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::Posts => "posts".to_string(),
            Channel::Messages { .. } => "messages".to_string(),
            Channel::FriendRequests { .. } => "friend-requests".to_string(),
            Channel::PostDetections { post_id } => format!("post-{}", post_id),
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Channel::Posts => "posts",
            Channel::Messages { .. } => "messages",
            Channel::FriendRequests { .. } => "friends",
            Channel::PostDetections { .. } => "detections",
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Channel::PostDetections { .. } => ChangeKind::Update,
            _ => ChangeKind::Insert,
        }
    }

    /// Returns true when a change to `record` in `table` passes this channel's filter.
    pub fn matches(&self, table: &str, kind: ChangeKind, record: &Value) -> bool {
        if table != self.table() || kind != self.kind() {
            return false;
        }
        match self {
            Channel::Posts => true,
            Channel::Messages { receiver_id } => record["receiver_id"] == receiver_id.as_str(),
            Channel::FriendRequests { friend_id } => record["friend_id"] == friend_id.as_str(),
            Channel::PostDetections { post_id } => record["post_id"] == *post_id,
        }
    }
}

/// A row change delivered on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Value,
}

/// Subscription lifecycle as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    Closed,
}

/// Everything a subscription can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

// == Subscription ==
/// Live subscription to one channel.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    receiver: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl Subscription {
    pub fn new(channel: Channel, receiver: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self { channel, receiver }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Waits for the next message; `None` once the backend dropped the channel.
    pub async fn next(&mut self) -> Option<ChannelMessage> {
        self.receiver.recv().await
    }

    /// Stops delivery. The backend notices on its next send.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Posts.name(), "posts");
        assert_eq!(Channel::PostDetections { post_id: 9 }.name(), "post-9");
        assert_eq!(
            Channel::FriendRequests { friend_id: "u".to_string() }.name(),
            "friend-requests"
        );
    }

    #[test]
    fn test_message_filter_checks_receiver() {
        let channel = Channel::Messages { receiver_id: "me".to_string() };
        assert!(channel.matches("messages", ChangeKind::Insert, &json!({"receiver_id": "me"})));
        assert!(!channel.matches("messages", ChangeKind::Insert, &json!({"receiver_id": "you"})));
        assert!(!channel.matches("posts", ChangeKind::Insert, &json!({"receiver_id": "me"})));
    }

    #[test]
    fn test_detection_filter_needs_update() {
        let channel = Channel::PostDetections { post_id: 3 };
        assert!(channel.matches("detections", ChangeKind::Update, &json!({"post_id": 3})));
        assert!(!channel.matches("detections", ChangeKind::Insert, &json!({"post_id": 3})));
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(Channel::Posts, rx);

        tx.send(ChannelMessage::Status(ChannelStatus::Subscribed)).unwrap();
        drop(tx);

        assert_eq!(
            subscription.next().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );
        assert_eq!(subscription.next().await, None);
    }
}
