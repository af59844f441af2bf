//! Data model and gateway DTOs
//!
//! `records` mirrors the backend tables, `feed` holds paging types and
//! `requests`/`responses` are the HTTP bodies of the gateway.

pub mod feed;
pub mod records;
pub mod requests;
pub mod responses;

pub use feed::{FeedPage, PostBatch};
pub use records::{
    Detection, DetectionStatus, Friend, FriendStatus, Message, PremiumUser, Post, Profile,
    ProfileUpdate, Session, User, DEFAULT_PROFILE_NAME,
};
pub use requests::UpdateProfileRequest;
pub use responses::{
    ClearCacheResponse, FeedResponse, HealthResponse, PostResponse, StatsResponse,
};
