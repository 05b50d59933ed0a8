pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Analysis API
        .route("/api/v1/analysis", post(handlers::handle_run_analysis))
        .route("/api/v1/analysis/stats", get(handlers::handle_get_stats))
        .route("/api/v1/analysis/cache", delete(handlers::handle_clear_cache))
        .with_state(state)
}
