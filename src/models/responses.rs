//! Response DTOs for the gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::feed::{FeedSnapshot, FetchOutcome};
use crate::models::Post;

/// Response body for the feed endpoints (GET /feed, POST /feed/refresh, POST /feed/next)
#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    /// What the triggering fetch did; absent for plain reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FetchOutcome>,
    pub items: Vec<Post>,
    pub offset: usize,
    pub has_more: bool,
    pub total_count: usize,
}

impl FeedResponse {
    pub fn new(snapshot: FeedSnapshot, outcome: Option<FetchOutcome>) -> Self {
        Self {
            outcome,
            items: snapshot.items,
            offset: snapshot.offset,
            has_more: snapshot.has_more,
            total_count: snapshot.total_count,
        }
    }
}

/// Response body for the stats endpoint (GET /cache/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub invalidated: u64,
    /// Entries currently held by the store
    pub total_entries: usize,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(stats: &CacheStats, total_entries: usize) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            expired: stats.expired,
            invalidated: stats.invalidated,
            total_entries,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearCacheResponse {
    pub message: String,
    pub removed: usize,
}

impl ClearCacheResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Removed {} cached entries", removed),
            removed,
        }
    }
}

/// Response body for the post mutation endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PostResponse {
    pub post: Post,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
