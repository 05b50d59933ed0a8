//! Pipeline Orchestrator — runs one combined analysis through three phases.
//!
//! Flow: validate → [embedding: resume ∥ job description] →
//!       [scoring: similarity ∥ keyword coverage + gap context] →
//!       [narrative: gap analysis] → PipelineResult.
//!
//! Each phase is joined before the next starts. Every phase runs under the
//! sooner of its own budget and the whole-pipeline deadline. A narrative
//! failure degrades to a partial result when partial results are enabled;
//! a failure anywhere else fails the request.
//!
//! `MatchEngine` also owns the shared cache, pool, retry strategy and
//! counters. One engine is built at startup and shared by every request.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::ContentCache;
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::embedding::{Embedding, EmbeddingResolver, Similarity};
use crate::errors::{AnalysisError, Phase, TimeoutScope};
use crate::keywords::{KeywordCoverageAnalyzer, MatchOptions};
use crate::metrics::{MetricEvent, MetricsSink};
use crate::pipeline::gap::{build_gap_prompt, prepare_gap_context, GapContext};
use crate::pipeline::result::{PhaseTimings, PipelineResult};
use crate::pool::{PoolStats, ResourcePool};
use crate::providers::{GapNarrative, HandleFactory, NarrativeParams, ProviderHandle};
use crate::retry::AdaptiveRetryStrategy;
use crate::stats::{ServiceStats, StatsTracker};
use crate::text::clean_markup;

/// Minimum length of each input text after markup cleaning, in characters.
pub const MIN_TEXT_CHARS: usize = 20;

/// Per-request overrides. Missing fields take the engine defaults.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Overrides the engine's partial-result policy for this request.
    pub partial_results: Option<bool>,
    pub case_sensitive: bool,
    pub plural_tolerance: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            partial_results: None,
            case_sensitive: false,
            plural_tolerance: true,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl AnalysisOptions {
    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.case_sensitive,
            plural_tolerance: self.plural_tolerance,
        }
    }

    fn narrative_params(&self) -> NarrativeParams {
        let defaults = NarrativeParams::default();
        NarrativeParams {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

/// Output of one scoring subtask; completion order is not fixed.
enum Scored {
    Similarity(Similarity),
    Context(GapContext),
}

pub struct MatchEngine {
    config: EngineConfig,
    cache: Arc<ContentCache<Embedding>>,
    pool: ResourcePool<ProviderHandle>,
    retry: Arc<AdaptiveRetryStrategy>,
    resolver: Arc<EmbeddingResolver>,
    stats: Arc<StatsTracker>,
    metrics: Arc<dyn MetricsSink>,
}

impl MatchEngine {
    /// Builds every shared component and pre-warms the client pool.
    pub async fn new(
        config: EngineConfig,
        factory: Arc<dyn HandleFactory<ProviderHandle>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cache = Arc::new(ContentCache::new(config.cache_ttl, config.cache_max_size));
        let pool = ResourcePool::new(factory, config.pool).await;
        let retry = Arc::new(AdaptiveRetryStrategy::new(config.retry.clone()));
        let stats = Arc::new(StatsTracker::new());
        let resolver = Arc::new(EmbeddingResolver::new(
            Arc::clone(&cache),
            pool.clone(),
            Arc::clone(&retry),
            Arc::clone(&stats),
            Arc::clone(&metrics),
            config.sigmoid,
        ));

        Self {
            config,
            cache,
            pool,
            retry,
            resolver,
            stats,
            metrics,
        }
    }

    /// Runs the full pipeline for one resume / job description pair.
    ///
    /// Returns a complete result, a partial result carrying a warning, or a
    /// single error naming every failed category.
    pub async fn run_combined_analysis(
        &self,
        resume: &str,
        job_description: &str,
        keywords: &[String],
        options: AnalysisOptions,
    ) -> Result<PipelineResult, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("combined_analysis", %request_id);
        self.run_phases(request_id, resume, job_description, keywords, options)
            .instrument(span)
            .await
    }

    async fn run_phases(
        &self,
        request_id: Uuid,
        resume: &str,
        job_description: &str,
        keywords: &[String],
        options: AnalysisOptions,
    ) -> Result<PipelineResult, AnalysisError> {
        let started = Instant::now();
        let resume = validate_text("resume", resume)?;
        let job_description = validate_text("job_description", job_description)?;
        let partial_enabled = options
            .partial_results
            .unwrap_or(self.config.partial_results_enabled);

        let pipeline = Deadline::after(self.config.pipeline_timeout, TimeoutScope::Pipeline);
        let mut timings = PhaseTimings::default();

        // Phase 1: both embeddings
        let phase_started = Instant::now();
        let deadline = self.phase_deadline(pipeline, Phase::Embedding);
        let (resume_vec, jd_vec) = match self
            .resolver
            .resolve_both(&resume, &job_description, deadline)
            .await
        {
            Ok(vectors) => vectors,
            Err(e) => return Err(self.fail(Phase::Embedding, e)),
        };
        timings.embedding_ms = self.phase_done(Phase::Embedding, phase_started);

        // Phase 2: similarity ∥ coverage + gap context
        let phase_started = Instant::now();
        let deadline = self.phase_deadline(pipeline, Phase::Scoring);
        let (similarity, context) = match self
            .score(
                resume_vec,
                jd_vec,
                resume,
                job_description,
                keywords.to_vec(),
                options.match_options(),
                deadline,
            )
            .await
        {
            Ok(scored) => scored,
            Err(e) => return Err(self.fail(Phase::Scoring, e)),
        };
        timings.scoring_ms = self.phase_done(Phase::Scoring, phase_started);
        info!(
            "Scored: similarity {:.1}% (calibrated {:.1}%), coverage {:.2}%",
            similarity.raw_percent,
            similarity.transformed_percent,
            context.coverage.coverage_percentage
        );

        // Phase 3: gap narrative
        let phase_started = Instant::now();
        let deadline = self.phase_deadline(pipeline, Phase::Narrative);
        let prompt = build_gap_prompt(&context, &similarity);
        let narrative = self
            .generate_narrative(&prompt, options.narrative_params(), deadline)
            .await;
        timings.narrative_ms = elapsed_ms(phase_started);
        timings.total_ms = elapsed_ms(started);

        match narrative {
            Ok(narrative) => {
                self.phase_done(Phase::Narrative, phase_started);
                self.stats.record_request(true, true);
                self.metrics.emit(MetricEvent::RequestCompleted {
                    partial: false,
                    elapsed_ms: timings.total_ms,
                });
                info!("Combined analysis complete in {}ms", timings.total_ms);
                Ok(PipelineResult::complete(
                    request_id,
                    similarity,
                    context.coverage,
                    narrative,
                    timings,
                ))
            }
            // The whole-request budget is spent; nothing to degrade to.
            Err(e @ AnalysisError::Timeout {
                scope: TimeoutScope::Pipeline,
                ..
            }) => Err(self.fail(Phase::Narrative, e)),
            Err(e) if partial_enabled => {
                let categories = e.categories();
                self.stats.record_failure_categories(&categories);
                self.stats.record_request(true, false);
                self.metrics.emit(MetricEvent::PhaseFailed {
                    phase: Phase::Narrative,
                    categories,
                });
                self.metrics.emit(MetricEvent::PartialResult {
                    similarity_raw: similarity.raw_percent,
                });
                self.metrics.emit(MetricEvent::RequestCompleted {
                    partial: true,
                    elapsed_ms: timings.total_ms,
                });
                warn!("Gap narrative unavailable, returning partial result: {e}");
                Ok(PipelineResult::partial(
                    request_id,
                    similarity,
                    context.coverage,
                    format!("Gap analysis unavailable: {e}"),
                    timings,
                ))
            }
            Err(e) => Err(self.fail(Phase::Narrative, e)),
        }
    }

    fn phase_deadline(&self, pipeline: Deadline, phase: Phase) -> Deadline {
        Deadline::nested(pipeline, self.config.phase_timeout, TimeoutScope::Phase(phase))
    }

    /// Similarity and keyword coverage are independent; both run as tasks
    /// and are joined before the narrative phase.
    #[allow(clippy::too_many_arguments)]
    async fn score(
        &self,
        resume_vec: Embedding,
        jd_vec: Embedding,
        resume: String,
        job_description: String,
        keywords: Vec<String>,
        match_options: MatchOptions,
        deadline: Deadline,
    ) -> Result<(Similarity, GapContext), AnalysisError> {
        let resolver = Arc::clone(&self.resolver);
        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            resolver
                .compute_similarity(&resume_vec, &jd_vec)
                .map(Scored::Similarity)
        });
        tasks.spawn(async move {
            let coverage = KeywordCoverageAnalyzer::new(match_options).analyze(&resume, &keywords);
            Ok(Scored::Context(prepare_gap_context(&resume, &job_description, coverage)))
        });

        let mut similarity = None;
        let mut context = None;
        for scored in join_phase(tasks, Phase::Scoring, deadline).await? {
            match scored {
                Scored::Similarity(s) => similarity = Some(s),
                Scored::Context(c) => context = Some(c),
            }
        }

        match (similarity, context) {
            (Some(similarity), Some(context)) => Ok((similarity, context)),
            _ => Err(AnalysisError::from_phase_failures(Phase::Scoring, Vec::new())),
        }
    }

    /// The retried narrative call, cut off at `deadline`. The call runs
    /// inline, so on timeout its lease is dropped before this returns.
    async fn generate_narrative(
        &self,
        prompt: &str,
        params: NarrativeParams,
        deadline: Deadline,
    ) -> Result<GapNarrative, AnalysisError> {
        let attempts = self
            .retry
            .execute_with_retry("gap narrative", || self.narrative_attempt(prompt, params));
        match tokio::time::timeout_at(deadline.at, attempts).await {
            Ok(result) => result,
            Err(_) => Err(deadline.timeout_error()),
        }
    }

    async fn narrative_attempt(
        &self,
        prompt: &str,
        params: NarrativeParams,
    ) -> Result<GapNarrative, AnalysisError> {
        let lease = self.pool.acquire().await?;
        let narrative = lease.narrative.generate(prompt, params).await;
        debug!("Narrative call held its client for {}ms", lease.held_for().as_millis());
        self.pool.release(lease);
        Ok(narrative?)
    }

    fn phase_done(&self, phase: Phase, started: Instant) -> u64 {
        let elapsed = started.elapsed();
        self.metrics.emit(MetricEvent::phase_completed(phase, elapsed));
        debug!("{phase} phase finished in {}ms", elapsed.as_millis());
        elapsed.as_millis() as u64
    }

    /// Records a failed request and hands the error back for propagation.
    fn fail(&self, phase: Phase, err: AnalysisError) -> AnalysisError {
        let categories = err.categories();
        self.stats.record_failure_categories(&categories);
        self.stats.record_request(false, false);
        self.metrics.emit(MetricEvent::PhaseFailed { phase, categories });
        error!("Combined analysis failed in {phase} phase: {err}");
        err
    }

    pub fn get_stats(&self) -> ServiceStats {
        self.stats.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Embedding cache cleared");
    }

    /// Closes the client pool. Requests still running finish with the
    /// handles they hold; new provider calls fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

fn validate_text(field: &str, raw: &str) -> Result<String, AnalysisError> {
    let cleaned = clean_markup(raw);
    if cleaned.chars().count() < MIN_TEXT_CHARS {
        return Err(AnalysisError::Validation(format!(
            "{field} must contain at least {MIN_TEXT_CHARS} characters of text"
        )));
    }
    Ok(cleaned)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Joins every task of one phase. If `deadline` passes first, the remaining
/// tasks are aborted and awaited before the timeout is returned. A panicked
/// task counts as a `TaskFailed` failure of `phase`.
async fn join_phase<T: Send + 'static>(
    mut tasks: JoinSet<Result<T, AnalysisError>>,
    phase: Phase,
    deadline: Deadline,
) -> Result<Vec<T>, AnalysisError> {
    let mut outputs = Vec::with_capacity(tasks.len());
    let mut failures = Vec::new();
    loop {
        let joined = tokio::select! {
            joined = tasks.join_next() => joined,
            _ = tokio::time::sleep_until(deadline.at) => {
                tasks.shutdown().await;
                return Err(deadline.timeout_error());
            }
        };
        match joined {
            None => break,
            Some(Ok(Ok(output))) => outputs.push(output),
            Some(Ok(Err(e))) => failures.push(e),
            Some(Err(join_err)) => failures.push(AnalysisError::TaskFailed {
                phase,
                message: join_err.to_string(),
            }),
        }
    }

    if failures.is_empty() {
        Ok(outputs)
    } else {
        Err(AnalysisError::from_phase_failures(phase, failures))
    }
}
