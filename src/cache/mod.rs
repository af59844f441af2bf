//! Cache Module
//!
//! Local freshness cache: TTL entries persisted to a key-value store.

mod entry;
pub mod keys;
mod kv;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use keys::FeedScope;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use stats::CacheStats;
pub use store::FreshnessCache;
