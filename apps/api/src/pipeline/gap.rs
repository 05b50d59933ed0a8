//! Gap-analysis context: what phase 2 hands to the narrative generator.

use crate::embedding::Similarity;
use crate::keywords::KeywordCoverage;
use crate::llm_client::prompts::GAP_ANALYSIS_PROMPT_TEMPLATE;
use crate::text::truncate_chars;

/// Per-text limit inside the prompt, in characters.
pub const MAX_PROMPT_TEXT_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq)]
pub struct GapContext {
    pub resume: String,
    pub job_description: String,
    pub coverage: KeywordCoverage,
}

/// Takes already-cleaned texts.
pub fn prepare_gap_context(
    resume: &str,
    job_description: &str,
    coverage: KeywordCoverage,
) -> GapContext {
    GapContext {
        resume: truncate_chars(resume, MAX_PROMPT_TEXT_CHARS).to_string(),
        job_description: truncate_chars(job_description, MAX_PROMPT_TEXT_CHARS).to_string(),
        coverage,
    }
}

pub fn build_gap_prompt(context: &GapContext, similarity: &Similarity) -> String {
    let coverage = &context.coverage;
    GAP_ANALYSIS_PROMPT_TEMPLATE
        .replace("{similarity_raw}", &format!("{:.1}", similarity.raw_percent))
        .replace(
            "{similarity_transformed}",
            &format!("{:.1}", similarity.transformed_percent),
        )
        .replace(
            "{coverage_percentage}",
            &format!("{:.2}", coverage.coverage_percentage),
        )
        .replace("{covered_count}", &coverage.covered_count.to_string())
        .replace("{total_keywords}", &coverage.total_keywords.to_string())
        .replace("{covered_keywords}", &keyword_list(&coverage.covered_keywords))
        .replace("{missed_keywords}", &keyword_list(&coverage.missed_keywords))
        .replace("{job_description}", &context.job_description)
        .replace("{resume}", &context.resume)
}

fn keyword_list(keywords: &[String]) -> String {
    if keywords.is_empty() {
        "(none)".to_string()
    } else {
        keywords.join(", ")
    }
}
