//! Feed paging types

use serde::{Deserialize, Serialize};

use crate::models::Post;

/// One backend response for a posts query: the rows plus the total row count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBatch {
    pub posts: Vec<Post>,
    pub count: usize,
}

/// A page of the feed as requested at `offset` with `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<Post>,
    pub offset: usize,
    pub limit: usize,
    pub total_count: usize,
}

impl FeedPage {
    pub fn new(batch: PostBatch, offset: usize, limit: usize) -> Self {
        let mut items = batch.posts;
        items.truncate(limit);
        Self {
            items,
            offset,
            limit,
            total_count: batch.count,
        }
    }

    /// True while rows remain past this page.
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total_count
    }

    /// True when this page ends pagination: short page or total reached.
    pub fn is_last(&self) -> bool {
        self.items.len() < self.limit || !self.has_more()
    }
}
