use std::fmt;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::providers::ExternalServiceError;
use crate::retry::{Classify, RetryCategory};

// ────────────────────────────────────────────────────────────────────────────
// Analysis taxonomy
// ────────────────────────────────────────────────────────────────────────────

/// Pipeline phase, used to label failures and timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Embedding,
    Scoring,
    Narrative,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Embedding => "embedding",
            Phase::Scoring => "scoring",
            Phase::Narrative => "narrative",
        })
    }
}

/// What a timeout budget covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    Phase(Phase),
    Pipeline,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Phase(phase) => write!(f, "{phase} phase"),
            TimeoutScope::Pipeline => f.write_str("pipeline"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Bad input. Fails fast, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    External(#[from] ExternalServiceError),

    #[error("{operation} failed after {attempts} attempt(s) [{category}]: {source}")]
    RetriesExhausted {
        operation: String,
        category: RetryCategory,
        attempts: u32,
        #[source]
        source: Box<AnalysisError>,
    },

    #[error("No client handle became available within {}ms", .waited.as_millis())]
    ResourceExhausted { waited: Duration },

    #[error("Client pool is shut down")]
    PoolClosed,

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Timed out: {scope} exceeded {}ms", .budget.as_millis())]
    Timeout { scope: TimeoutScope, budget: Duration },

    #[error("Subtask failed in {phase} phase: {message}")]
    TaskFailed { phase: Phase, message: String },
}

impl AnalysisError {
    /// Validation errors fail fast; everything else goes through the policy table.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AnalysisError::Validation(_))
    }

    /// Collapses the failed subtasks of one phase: a single failure is
    /// returned as-is, two or more become an `AggregateError`.
    pub fn from_phase_failures(phase: Phase, mut errors: Vec<AnalysisError>) -> Self {
        match errors.len() {
            0 => AnalysisError::TaskFailed {
                phase,
                message: "subtask produced no output".to_string(),
            },
            1 => errors.remove(0),
            _ => AnalysisError::Aggregate(AggregateError { phase, errors }),
        }
    }

    /// Every failure category this error carries, one per wrapped failure.
    pub fn categories(&self) -> Vec<RetryCategory> {
        match self {
            AnalysisError::Aggregate(agg) => agg.categories(),
            other => vec![other.retry_category()],
        }
    }
}

impl Classify for AnalysisError {
    fn retry_category(&self) -> RetryCategory {
        match self {
            AnalysisError::External(e) => e.retry_category(),
            AnalysisError::RetriesExhausted { category, .. } => *category,
            AnalysisError::Timeout { .. } => RetryCategory::Timeout,
            AnalysisError::Validation(_)
            | AnalysisError::ResourceExhausted { .. }
            | AnalysisError::PoolClosed
            | AnalysisError::Aggregate(_)
            | AnalysisError::TaskFailed { .. } => RetryCategory::Unknown,
        }
    }
}

/// Two or more subtasks of one phase failed together.
#[derive(Debug)]
pub struct AggregateError {
    pub phase: Phase,
    pub errors: Vec<AnalysisError>,
}

impl AggregateError {
    pub fn categories(&self) -> Vec<RetryCategory> {
        self.errors.iter().flat_map(|e| e.categories()).collect()
    }
}

impl std::error::Error for AggregateError {}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let categories = self
            .categories()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{} subtasks failed in {} phase [{categories}]: ",
            self.errors.len(),
            self.phase
        )?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP surface
// ────────────────────────────────────────────────────────────────────────────

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream AI service error: {0}")]
    Upstream(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Validation(msg) => AppError::Validation(msg),
            e @ (AnalysisError::ResourceExhausted { .. } | AnalysisError::PoolClosed) => {
                AppError::ServiceUnavailable(e.to_string())
            }
            e @ (AnalysisError::External(_)
            | AnalysisError::RetriesExhausted { .. }
            | AnalysisError::Aggregate(_)) => AppError::Upstream(e.to_string()),
            e @ AnalysisError::Timeout { .. } => AppError::Timeout(e.to_string()),
            e @ AnalysisError::TaskFailed { .. } => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "The analysis service is at capacity, retry later".to_string(),
                )
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream AI error: {msg}");
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg.clone())
            }
            AppError::Timeout(msg) => {
                tracing::error!("Analysis timed out: {msg}");
                (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
