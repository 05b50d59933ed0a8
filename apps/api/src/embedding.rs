//! Embedding Resolver — cache-backed wrapper over the embedding provider,
//! plus the similarity math applied to the resulting vectors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ContentCache, EMBEDDING_NAMESPACE};
use crate::deadline::Deadline;
use crate::errors::{AnalysisError, Phase};
use crate::metrics::{MetricEvent, MetricsSink};
use crate::pool::ResourcePool;
use crate::providers::{ExternalServiceError, ProviderHandle, ServiceErrorKind};
use crate::retry::AdaptiveRetryStrategy;
use crate::stats::StatsTracker;

pub type Embedding = Arc<Vec<f32>>;

const SLOT_LABELS: [&str; 2] = ["resume embedding", "job description embedding"];

// ────────────────────────────────────────────────────────────────────────────
// Similarity
// ────────────────────────────────────────────────────────────────────────────

/// Parameters of the logistic calibration curve applied to raw similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidParams {
    /// Midpoint on the raw [0, 1] scale.
    pub x0: f64,
    /// Steepness.
    pub k: f64,
}

impl Default for SigmoidParams {
    fn default() -> Self {
        Self { x0: 0.5, k: 10.0 }
    }
}

/// `1 / (1 + e^(-k(x - x0)))`, saturating to 0.0 / 1.0 where `exp` would
/// overflow. NaN input maps to 0.0.
pub fn sigmoid(x: f64, params: SigmoidParams) -> f64 {
    let z = -params.k * (x - params.x0);
    if z.is_nan() {
        return 0.0;
    }
    if z > 709.0 {
        return 0.0;
    }
    if z < -709.0 {
        return 1.0;
    }
    1.0 / (1.0 + z.exp())
}

/// Cosine similarity of two vectors. Zero for empty or zero-norm inputs.
/// Dimension mismatches are rejected by `compute_similarity`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    /// Cosine similarity clamped to [0, 1], as a percentage.
    pub raw_percent: f64,
    /// Sigmoid-calibrated similarity, as a percentage.
    pub transformed_percent: f64,
}

/// Fails when the two vectors have different dimensions: the provider broke
/// its contract and any score would be meaningless.
pub fn compute_similarity(
    a: &[f32],
    b: &[f32],
    params: SigmoidParams,
) -> Result<Similarity, AnalysisError> {
    if a.len() != b.len() {
        return Err(ExternalServiceError::new(
            "embedding",
            ServiceErrorKind::Generic,
            format!("embedding dimensions differ: {} vs {}", a.len(), b.len()),
        )
        .into());
    }
    let raw = cosine_similarity(a, b).clamp(0.0, 1.0);
    Ok(Similarity {
        raw_percent: raw * 100.0,
        transformed_percent: sigmoid(raw, params) * 100.0,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Resolver
// ────────────────────────────────────────────────────────────────────────────

pub struct EmbeddingResolver {
    cache: Arc<ContentCache<Embedding>>,
    pool: ResourcePool<ProviderHandle>,
    retry: Arc<AdaptiveRetryStrategy>,
    stats: Arc<StatsTracker>,
    metrics: Arc<dyn MetricsSink>,
    sigmoid: SigmoidParams,
}

impl EmbeddingResolver {
    pub fn new(
        cache: Arc<ContentCache<Embedding>>,
        pool: ResourcePool<ProviderHandle>,
        retry: Arc<AdaptiveRetryStrategy>,
        stats: Arc<StatsTracker>,
        metrics: Arc<dyn MetricsSink>,
        sigmoid: SigmoidParams,
    ) -> Self {
        Self {
            cache,
            pool,
            retry,
            stats,
            metrics,
            sigmoid,
        }
    }

    /// One attempt: cache lookup, then a provider call on a pooled handle.
    /// Successful results are cached; failures never are.
    pub async fn resolve(&self, text: &str) -> Result<Embedding, AnalysisError> {
        let key = CacheKey::for_content(EMBEDDING_NAMESPACE, text);

        if let Some(hit) = self.cache.get(&key) {
            self.stats.record_cache_hit();
            self.metrics.emit(MetricEvent::CacheLookup {
                namespace: key.namespace(),
                hit: true,
            });
            debug!("Embedding cache hit for {key}");
            return Ok(hit);
        }
        self.stats.record_cache_miss();
        self.metrics.emit(MetricEvent::CacheLookup {
            namespace: key.namespace(),
            hit: false,
        });

        let vector = {
            let lease = self.pool.acquire().await?;
            let mut vectors = lease.embeddings.create_embeddings(&[text.to_string()]).await?;
            vectors.pop().ok_or_else(|| {
                ExternalServiceError::new(
                    "embedding",
                    ServiceErrorKind::EmptyResponse,
                    "provider returned no embedding",
                )
            })?
        };

        let embedding: Embedding = Arc::new(vector);
        self.cache.set(key, Arc::clone(&embedding));
        Ok(embedding)
    }

    /// `resolve` under the adaptive retry strategy.
    pub async fn resolve_with_retry(
        &self,
        label: &str,
        text: &str,
    ) -> Result<Embedding, AnalysisError> {
        self.retry
            .execute_with_retry(label, || self.resolve(text))
            .await
    }

    /// Resolves both texts concurrently, each under its own retries. A
    /// subtask that could not run to completion as a task (panic, runtime
    /// shutdown) is re-resolved inline; results that did complete are kept.
    ///
    /// One failure is returned as-is, two as an `AggregateError`. When the
    /// deadline passes, both tasks are aborted and awaited before the timeout
    /// is returned, so their leases are back in the pool by then.
    pub async fn resolve_both(
        self: &Arc<Self>,
        text_a: &str,
        text_b: &str,
        deadline: Deadline,
    ) -> Result<(Embedding, Embedding), AnalysisError> {
        let mut tasks = JoinSet::new();
        for (slot, text) in [(0usize, text_a), (1, text_b)] {
            let resolver = Arc::clone(self);
            let text = text.to_string();
            tasks.spawn(async move {
                let result = resolver.resolve_with_retry(SLOT_LABELS[slot], &text).await;
                (slot, result)
            });
        }

        let mut results: [Option<Result<Embedding, AnalysisError>>; 2] = [None, None];
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = tokio::time::sleep_until(deadline.at) => {
                    tasks.shutdown().await;
                    warn!("Embedding resolution cancelled: {} deadline reached", deadline.scope);
                    return Err(deadline.timeout_error());
                }
            };
            match joined {
                None => break,
                Some(Ok((slot, result))) => results[slot] = Some(result),
                // The slot stays empty and is resolved inline below.
                Some(Err(join_err)) => warn!(
                    "Concurrent embedding task did not complete ({join_err}); resolving sequentially"
                ),
            }
        }

        let [a, b] = results;
        let a = match a {
            Some(r) => r,
            None => self.resolve_inline(0, text_a, deadline).await?,
        };
        let b = match b {
            Some(r) => r,
            None => self.resolve_inline(1, text_b, deadline).await?,
        };

        match (a, b) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(ea), Err(eb)) => Err(AnalysisError::from_phase_failures(
                Phase::Embedding,
                vec![ea, eb],
            )),
        }
    }

    /// Sequential fallback. The outer `Result` is the deadline, the inner
    /// one the resolution itself.
    async fn resolve_inline(
        &self,
        slot: usize,
        text: &str,
        deadline: Deadline,
    ) -> Result<Result<Embedding, AnalysisError>, AnalysisError> {
        tokio::time::timeout_at(deadline.at, self.resolve_with_retry(SLOT_LABELS[slot], text))
            .await
            .map_err(|_| deadline.timeout_error())
    }

    pub fn compute_similarity(&self, a: &[f32], b: &[f32]) -> Result<Similarity, AnalysisError> {
        compute_similarity(a, b, self.sigmoid)
    }
}
