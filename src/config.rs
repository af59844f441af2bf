//! Configuration Module
//!
//! Handles loading and managing client configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Sync layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of posts requested per feed page
    pub feed_page_size: usize,
    /// TTL in seconds for posts, profiles, friends and messages
    pub cache_ttl: u64,
    /// TTL in seconds for cached premium status
    pub premium_cache_ttl: u64,
    /// Lifetime in seconds requested for signed image URLs
    pub signed_url_expires_in: u64,
    /// How long a looked-up session is reused before asking the backend again
    pub auth_cache_secs: u64,
    /// Delay before resubscribing a realtime channel that reported an error
    pub resubscribe_delay_secs: u64,
    /// Interval in seconds between sweeps of expired cache entries (0 disables)
    pub cleanup_interval: u64,
    /// HTTP gateway port
    pub server_port: u16,
    /// File backing the local key-value store, in-memory when unset
    pub store_path: Option<PathBuf>,
    /// JSON fixture used to seed the in-process backend
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FEED_PAGE_SIZE` - Posts per page (default: 10)
    /// - `CACHE_TTL` - Default cache TTL in seconds (default: 300)
    /// - `PREMIUM_CACHE_TTL` - Premium status TTL in seconds (default: 3600)
    /// - `SIGNED_URL_EXPIRES_IN` - Signed URL lifetime in seconds (default: 3600)
    /// - `AUTH_CACHE_SECS` - Session reuse window in seconds (default: 60)
    /// - `RESUBSCRIBE_DELAY_SECS` - Realtime resubscribe delay (default: 5)
    /// - `CLEANUP_INTERVAL` - Expired entry sweep frequency in seconds (default: 60)
    /// - `SERVER_PORT` - HTTP gateway port (default: 3000)
    /// - `STORE_PATH` - Key-value store file (default: in-memory)
    /// - `SEED_FILE` - Backend seed fixture (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            feed_page_size: parse_var("FEED_PAGE_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.feed_page_size),
            cache_ttl: parse_var("CACHE_TTL").unwrap_or(defaults.cache_ttl),
            premium_cache_ttl: parse_var("PREMIUM_CACHE_TTL").unwrap_or(defaults.premium_cache_ttl),
            signed_url_expires_in: parse_var("SIGNED_URL_EXPIRES_IN")
                .unwrap_or(defaults.signed_url_expires_in),
            auth_cache_secs: parse_var("AUTH_CACHE_SECS").unwrap_or(defaults.auth_cache_secs),
            resubscribe_delay_secs: parse_var("RESUBSCRIBE_DELAY_SECS")
                .unwrap_or(defaults.resubscribe_delay_secs),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            store_path: env::var("STORE_PATH").ok().map(PathBuf::from),
            seed_file: env::var("SEED_FILE").ok().map(PathBuf::from),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_page_size: 10,
            cache_ttl: 300,
            premium_cache_ttl: 3600,
            signed_url_expires_in: 3600,
            auth_cache_secs: 60,
            resubscribe_delay_secs: 5,
            cleanup_interval: 60,
            server_port: 3000,
            store_path: None,
            seed_file: None,
        }
    }
}
