//! Cache Statistics Module
//!
//! Tracks freshness cache behaviour: hits, misses and stale purges.

use serde::Serialize;

// == Cache Stats ==
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads served from a fresh entry
    pub hits: u64,
    /// Reads that found nothing usable (absent, expired or undecodable)
    pub misses: u64,
    /// Entries removed because their TTL had elapsed
    pub expired: u64,
    /// Entries removed by explicit invalidation
    pub invalidated: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expired(&mut self, count: usize) {
        self.expired += count as u64;
    }

    pub fn record_invalidated(&mut self, count: usize) {
        self.invalidated += count as u64;
    }
}
