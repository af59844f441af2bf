//! Cache key derivation
//!
//! Every key is `<resource prefix><identifiers>`, so a prefix invalidation
//! covers all pages of one resource. Paged keys close their id segment with
//! `:` and escape it inside ids, so one id's prefix never covers another id.

pub const SIGNED_URL_PREFIX: &str = "signed_url_";
pub const PROFILE_PREFIX: &str = "profile_";
pub const FEED_PREFIX: &str = "feed_posts_";
pub const FRIENDS_KEY: &str = "friends_list";
pub const MESSAGES_PREFIX: &str = "messages_";
pub const PREMIUM_PREFIX: &str = "premium_";

/// All namespaces owned by this crate; anything else in the store is foreign.
pub const NAMESPACES: [&str; 6] = [
    SIGNED_URL_PREFIX,
    PROFILE_PREFIX,
    FEED_PREFIX,
    FRIENDS_KEY,
    MESSAGES_PREFIX,
    PREMIUM_PREFIX,
];

/// Which posts a feed shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedScope {
    /// Everyone visible to the signed-in user
    All,
    /// A single user's posts (profile grid)
    User(String),
}

impl FeedScope {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            FeedScope::All => None,
            FeedScope::User(id) => Some(id),
        }
    }

    fn segment(&self) -> String {
        escape(self.user_id().unwrap_or("all"))
    }
}

/// Escapes the segment terminator (and the escape char) inside an id.
fn escape(id: &str) -> String {
    id.replace('%', "%25").replace(':', "%3A")
}

pub fn signed_url(bucket: &str, path: &str) -> String {
    format!("{}{}_{}", SIGNED_URL_PREFIX, bucket, path)
}

pub fn profile(user_id: &str) -> String {
    format!("{}{}", PROFILE_PREFIX, user_id)
}

/// Prefix shared by every cached page of one feed.
pub fn feed_prefix(scope: &FeedScope) -> String {
    format!("{}{}:", FEED_PREFIX, scope.segment())
}

pub fn feed_page(scope: &FeedScope, limit: usize, offset: usize) -> String {
    format!("{}{}_{}", feed_prefix(scope), limit, offset)
}

/// Prefix shared by every cached page of one conversation.
pub fn conversation_prefix(me: &str, other: &str) -> String {
    format!("{}{}:{}:", MESSAGES_PREFIX, escape(me), escape(other))
}

pub fn messages_page(me: &str, other: &str, limit: usize, offset: usize) -> String {
    format!("{}{}_{}", conversation_prefix(me, other), limit, offset)
}

pub fn premium(user_id: &str) -> String {
    format!("{}{}", PREMIUM_PREFIX, user_id)
}

/// True when `key` belongs to one of this crate's namespaces.
pub fn is_owned(key: &str) -> bool {
    NAMESPACES.iter().any(|ns| key.starts_with(ns))
}
