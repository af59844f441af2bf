//! Pawket Sync - client-side data layer for a cat photo-sharing app
//!
//! Keeps a local freshness cache over an abstract backend, drives the
//! paginated post feed and resyncs it on realtime change events.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod realtime;
pub mod service;
pub mod session;
pub mod storage;
pub mod tasks;

pub use api::{create_router, AppState};
pub use backend::{Backend, InMemoryBackend, Seed};
pub use cache::{FileStore, FreshnessCache, KeyValueStore, MemoryStore};
pub use config::Config;
pub use error::{Result, SyncError};
pub use feed::{FeedSnapshot, FeedSynchronizer, FetchOutcome};
pub use realtime::{Channel, ListenerHandle, RealtimeListener};
pub use service::AppContext;
pub use session::Lifecycle;
pub use tasks::spawn_cleanup_task;
