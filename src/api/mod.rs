//! API Module
//!
//! HTTP gateway exposing the sync layer over REST.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /feed`, `POST /feed/refresh`, `POST /feed/next` - Feed paging
//! - `GET /profile/:id`, `PATCH /profile/:id` - Profiles
//! - `POST /posts/:id/like`, `DELETE /posts/:id` - Post mutations
//! - `GET /cache/stats`, `DELETE /cache` - Local cache

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
