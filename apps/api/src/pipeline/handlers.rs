//! Axum route handlers for the Analysis API.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::pipeline::{AnalysisOptions, PipelineResult};
use crate::pool::PoolStats;
use crate::state::AppState;
use crate::stats::ServiceStats;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub resume: String,
    pub job_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub service: ServiceStats,
    pub cache_hit_rate: f64,
    pub cache_entries: usize,
    pub pool: PoolStats,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/analysis
pub async fn handle_run_analysis(
    State(state): State<AppState>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<PipelineResult>, AppError> {
    let result = state
        .engine
        .run_combined_analysis(&req.resume, &req.job_description, &req.keywords, req.options)
        .await?;
    Ok(Json(result))
}

/// GET /api/v1/analysis/stats
pub async fn handle_get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let service = state.engine.get_stats();
    Json(StatsResponse {
        cache_hit_rate: service.cache_hit_rate(),
        service,
        cache_entries: state.engine.cache_entries(),
        pool: state.engine.pool_stats(),
    })
}

/// DELETE /api/v1/analysis/cache
pub async fn handle_clear_cache(State(state): State<AppState>) -> StatusCode {
    state.engine.clear_cache();
    StatusCode::NO_CONTENT
}
