use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::embedding::Similarity;
use crate::keywords::KeywordCoverage;
use crate::providers::GapNarrative;

/// Wall-clock time spent in each phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub embedding_ms: u64,
    pub scoring_ms: u64,
    pub narrative_ms: u64,
    pub total_ms: u64,
}

/// Outcome of one combined analysis.
///
/// Fields are private so the only way to build one is `complete` or
/// `partial`: a result is partial exactly when it has no narrative.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    request_id: Uuid,
    similarity_raw: f64,
    similarity_transformed: f64,
    keyword_coverage: KeywordCoverage,
    gap_narrative: Option<GapNarrative>,
    partial: bool,
    warning: Option<String>,
    timings: PhaseTimings,
    completed_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn complete(
        request_id: Uuid,
        similarity: Similarity,
        keyword_coverage: KeywordCoverage,
        gap_narrative: GapNarrative,
        timings: PhaseTimings,
    ) -> Self {
        Self {
            request_id,
            similarity_raw: similarity.raw_percent,
            similarity_transformed: similarity.transformed_percent,
            keyword_coverage,
            gap_narrative: Some(gap_narrative),
            partial: false,
            warning: None,
            timings,
            completed_at: Utc::now(),
        }
    }

    pub fn partial(
        request_id: Uuid,
        similarity: Similarity,
        keyword_coverage: KeywordCoverage,
        warning: impl Into<String>,
        timings: PhaseTimings,
    ) -> Self {
        Self {
            request_id,
            similarity_raw: similarity.raw_percent,
            similarity_transformed: similarity.transformed_percent,
            keyword_coverage,
            gap_narrative: None,
            partial: true,
            warning: Some(warning.into()),
            timings,
            completed_at: Utc::now(),
        }
    }
}

// Read accessors for assertions. The HTTP layer serializes the whole value.
#[cfg(test)]
impl PipelineResult {
    pub fn similarity_raw(&self) -> f64 {
        self.similarity_raw
    }

    pub fn similarity_transformed(&self) -> f64 {
        self.similarity_transformed
    }

    pub fn keyword_coverage(&self) -> &KeywordCoverage {
        &self.keyword_coverage
    }

    pub fn gap_narrative(&self) -> Option<&GapNarrative> {
        self.gap_narrative.as_ref()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_narrative;

    fn similarity() -> Similarity {
        Similarity {
            raw_percent: 72.0,
            transformed_percent: 90.0,
        }
    }

    fn coverage() -> KeywordCoverage {
        KeywordCoverage {
            total_keywords: 2,
            covered_count: 1,
            coverage_percentage: 50.0,
            covered_keywords: vec!["rust".into()],
            missed_keywords: vec!["kubernetes".into()],
        }
    }

    #[test]
    fn test_partial_iff_narrative_missing() {
        let full = PipelineResult::complete(
            Uuid::new_v4(),
            similarity(),
            coverage(),
            sample_narrative(),
            PhaseTimings::default(),
        );
        assert!(!full.is_partial());
        assert!(full.gap_narrative().is_some());
        assert!(full.warning().is_none());

        let partial = PipelineResult::partial(
            Uuid::new_v4(),
            similarity(),
            coverage(),
            "narrative unavailable",
            PhaseTimings::default(),
        );
        assert!(partial.is_partial());
        assert!(partial.gap_narrative().is_none());
        assert_eq!(partial.warning(), Some("narrative unavailable"));
        assert_eq!(partial.similarity_raw(), 72.0);
    }

    #[test]
    fn test_serializes_null_narrative_for_partial() {
        let partial = PipelineResult::partial(
            Uuid::new_v4(),
            similarity(),
            coverage(),
            "narrative unavailable",
            PhaseTimings::default(),
        );
        let json = serde_json::to_value(&partial).unwrap();
        assert!(json["gap_narrative"].is_null());
        assert_eq!(json["partial"], true);
        assert_eq!(json["keyword_coverage"]["covered_count"], 1);
    }
}
