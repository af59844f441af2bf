//! API Handlers
//!
//! HTTP request handlers for each gateway endpoint. Every handler delegates
//! to the shared [`AppContext`].

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{Result, SyncError};
use crate::models::{
    ClearCacheResponse, FeedResponse, HealthResponse, PostResponse, Profile, StatsResponse,
    UpdateProfileRequest,
};
use crate::service::AppContext;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }
}

// == Feed ==

/// Handler for GET /feed
///
/// Returns the feed as currently held, without fetching.
pub async fn feed_handler(State(state): State<AppState>) -> Json<FeedResponse> {
    let snapshot = state.ctx.feed().snapshot().await;
    Json(FeedResponse::new(snapshot, None))
}

/// Handler for POST /feed/refresh
///
/// Resets the feed to its first page.
pub async fn refresh_feed_handler(State(state): State<AppState>) -> Result<Json<FeedResponse>> {
    let outcome = state.ctx.feed().fetch(true).await?;
    let snapshot = state.ctx.feed().snapshot().await;
    Ok(Json(FeedResponse::new(snapshot, Some(outcome))))
}

/// Handler for POST /feed/next
///
/// Appends the next page; a no-op once the feed is exhausted.
pub async fn next_page_handler(State(state): State<AppState>) -> Result<Json<FeedResponse>> {
    let outcome = state.ctx.feed().fetch(false).await?;
    let snapshot = state.ctx.feed().snapshot().await;
    Ok(Json(FeedResponse::new(snapshot, Some(outcome))))
}

// == Profiles ==

/// Handler for GET /profile/:id
pub async fn get_profile_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Profile>> {
    let profile = state.ctx.get_profile(&user_id).await?;
    Ok(Json(profile))
}

/// Handler for PATCH /profile/:id
pub async fn update_profile_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>> {
    if let Some(error_msg) = req.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }

    let profile = state.ctx.update_profile(&user_id, &req.into_update()).await?;
    Ok(Json(profile))
}

// == Posts ==

/// Handler for POST /posts/:id/like
pub async fn like_post_handler(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<PostResponse>> {
    let post = state.ctx.like_post(post_id).await?;
    Ok(Json(PostResponse { post }))
}

/// Handler for DELETE /posts/:id
///
/// Soft-deletes the post and drops it from the held feed.
pub async fn delete_post_handler(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<PostResponse>> {
    let post = state.ctx.delete_post(post_id).await?;
    Ok(Json(PostResponse { post }))
}

// == Cache ==

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let cache = state.ctx.cache();
    let stats = cache.stats().await;
    let total_entries = cache.len().await?;

    Ok(Json(StatsResponse::new(&stats, total_entries)))
}

/// Handler for DELETE /cache
pub async fn clear_cache_handler(State(state): State<AppState>) -> Result<Json<ClearCacheResponse>> {
    let removed = state.ctx.clear_cache().await?;
    Ok(Json(ClearCacheResponse::new(removed)))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
