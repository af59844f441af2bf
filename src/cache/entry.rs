//! Cache Entry Module
//!
//! Defines the persisted shape of a cached value together with its expiry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A cached JSON value and the instant after which it must not be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: String,
    /// The cached value
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry that expires `ttl_seconds` from now.
    pub fn new(key: impl Into<String>, value: Value, ttl_seconds: u64) -> Self {
        let now = current_timestamp_ms();
        Self {
            key: key.into(),
            value,
            created_at: now,
            expires_at: now.saturating_add(ttl_seconds.saturating_mul(1000)),
        }
    }

    /// Creates an entry with an explicit expiry timestamp.
    pub fn until(key: impl Into<String>, value: Value, expires_at: u64) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: current_timestamp_ms(),
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
