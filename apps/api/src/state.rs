use std::sync::Arc;

use crate::pipeline::MatchEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the cache, client pool, retry strategy and counters.
    pub engine: Arc<MatchEngine>,
}
