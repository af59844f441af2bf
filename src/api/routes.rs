//! API Routes
//!
//! Configures the Axum router with all gateway endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_cache_handler, delete_post_handler, feed_handler, get_profile_handler, health_handler,
    like_post_handler, next_page_handler, refresh_feed_handler, stats_handler,
    update_profile_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /feed` - Feed as currently held
/// - `POST /feed/refresh` - Reset to the first page
/// - `POST /feed/next` - Append the next page
/// - `GET /profile/:id`, `PATCH /profile/:id` - Read or update a profile
/// - `POST /posts/:id/like` - Like a post
/// - `DELETE /posts/:id` - Soft-delete a post
/// - `GET /cache/stats` - Cache statistics
/// - `DELETE /cache` - Drop all cached entries
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/feed", get(feed_handler))
        .route("/feed/refresh", post(refresh_feed_handler))
        .route("/feed/next", post(next_page_handler))
        .route(
            "/profile/:id",
            get(get_profile_handler).patch(update_profile_handler),
        )
        .route("/posts/:id/like", post(like_post_handler))
        .route("/posts/:id", delete(delete_post_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache", delete(clear_cache_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
