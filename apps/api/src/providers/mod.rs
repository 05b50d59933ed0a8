//! External AI collaborators and the error type produced at their I/O boundary.
//!
//! ARCHITECTURAL RULE: provider clients translate transport failures into
//! `ExternalServiceError` exactly once, here. Nothing above this module looks
//! at HTTP status codes or error strings.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::llm_client::LlmClient;

pub mod embedding_client;

pub use embedding_client::OpenAiEmbeddingClient;

// ────────────────────────────────────────────────────────────────────────────
// Boundary error
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    Auth,
    RateLimit,
    Server,
    Timeout,
    /// The provider answered but the payload was empty or missing required fields.
    EmptyResponse,
    Generic,
}

impl ServiceErrorKind {
    /// Maps an HTTP status to a kind. `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Auth),
            408 => Some(Self::Timeout),
            429 => Some(Self::RateLimit),
            500..=599 => Some(Self::Server),
            _ => Some(Self::Generic),
        }
    }

    /// Translation shim for failures that only carry a message (transport
    /// errors, SDK errors without a status). Pure: the same message always
    /// yields the same kind.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimit
        } else if lower.contains("empty") || lower.contains("missing required") {
            Self::EmptyResponse
        } else if lower.contains("authentication") || lower.contains("401") {
            Self::Auth
        } else if lower.contains("server error") || lower.contains("503") || lower.contains("502")
        {
            Self::Server
        } else {
            Self::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::EmptyResponse => "empty_response",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to an external AI service.
#[derive(Debug, Clone, Error)]
#[error("{service} {kind} error: {message}")]
pub struct ExternalServiceError {
    pub service: &'static str,
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ExternalServiceError {
    pub fn new(service: &'static str, kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(service: &'static str, status: u16, body: impl Into<String>) -> Self {
        let kind = ServiceErrorKind::from_status(status).unwrap_or(ServiceErrorKind::Generic);
        Self::new(service, kind, format!("status {status}: {}", body.into()))
    }

    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ServiceErrorKind::Timeout
        } else if let Some(status) = err.status() {
            ServiceErrorKind::from_status(status.as_u16()).unwrap_or(ServiceErrorKind::Generic)
        } else {
            ServiceErrorKind::from_message(&err.to_string())
        };
        Self::new(service, kind, err.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Collaborator traits
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns one vector per input text, in input order.
    async fn create_embeddings(&self, texts: &[String])
        -> Result<Vec<Vec<f32>>, ExternalServiceError>;
}

/// Structured gap narrative produced by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapNarrative {
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub improvements: Vec<String>,
    pub assessment: String,
}

impl GapNarrative {
    /// Names of required fields the generator left empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.strengths.iter().all(|s| s.trim().is_empty()) {
            missing.push("strengths");
        }
        if self.gaps.iter().all(|s| s.trim().is_empty()) {
            missing.push("gaps");
        }
        if self.assessment.trim().is_empty() {
            missing.push("assessment");
        }
        missing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NarrativeParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for NarrativeParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

#[async_trait]
pub trait GapNarrativeGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: NarrativeParams,
    ) -> Result<GapNarrative, ExternalServiceError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Pooled handles
// ────────────────────────────────────────────────────────────────────────────

/// One reusable set of provider clients, lent out by the resource pool.
#[derive(Clone)]
pub struct ProviderHandle {
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub narrative: Arc<dyn GapNarrativeGenerator>,
}

/// Creates fresh handles for the resource pool.
#[async_trait]
pub trait HandleFactory<H>: Send + Sync {
    async fn create(&self) -> anyhow::Result<H>;
}

/// Production factory: every handle owns its own HTTP clients.
pub struct HttpHandleFactory {
    config: ProviderConfig,
}

impl HttpHandleFactory {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HandleFactory<ProviderHandle> for HttpHandleFactory {
    async fn create(&self) -> anyhow::Result<ProviderHandle> {
        let embeddings = OpenAiEmbeddingClient::new(
            self.config.embedding_api_url.clone(),
            self.config.embedding_api_key.clone(),
            self.config.embedding_model.clone(),
        )?;
        let narrative = LlmClient::new(self.config.anthropic_api_key.clone())?;
        Ok(ProviderHandle {
            embeddings: Arc::new(embeddings),
            narrative: Arc::new(narrative),
        })
    }
}
