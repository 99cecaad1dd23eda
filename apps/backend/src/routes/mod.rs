//! API routes for the routex backend.

pub mod health;
pub mod quote;
pub mod swap;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the API router with all routes.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(quote::router())
        .merge(swap::router())
}
