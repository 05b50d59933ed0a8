//! Keyword Coverage — deterministic matcher that measures how many of the
//! requested keywords appear in a document.
//!
//! Matching is word-boundary based so "go" does not match "google", and it
//! tolerates symbols inside keywords ("c++", "node.js"). Nothing here is
//! cached; the whole analysis is cheaper than a cache lookup round trip.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Result of a single coverage analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCoverage {
    pub total_keywords: usize,
    pub covered_count: usize,
    /// 0.00 – 100.00, rounded half-up to two decimals in integer arithmetic.
    pub coverage_percentage: f64,
    pub covered_keywords: Vec<String>,
    pub missed_keywords: Vec<String>,
}

impl KeywordCoverage {
    fn empty() -> Self {
        Self {
            total_keywords: 0,
            covered_count: 0,
            coverage_percentage: 0.0,
            covered_keywords: vec![],
            missed_keywords: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub plural_tolerance: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            plural_tolerance: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordCoverageAnalyzer {
    options: MatchOptions,
}

impl KeywordCoverageAnalyzer {
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    /// Analyzes `text` against `keywords`. Blank keywords are ignored and
    /// duplicates (under the active case rule) are counted once.
    pub fn analyze(&self, text: &str, keywords: &[String]) -> KeywordCoverage {
        let keywords = dedup_keywords(keywords, self.options.case_sensitive);
        if keywords.is_empty() {
            return KeywordCoverage::empty();
        }

        let mut covered_keywords = Vec::new();
        let mut missed_keywords = Vec::new();

        for keyword in keywords {
            if self.matches(text, &keyword) {
                covered_keywords.push(keyword);
            } else {
                missed_keywords.push(keyword);
            }
        }

        let total_keywords = covered_keywords.len() + missed_keywords.len();
        let covered_count = covered_keywords.len();

        KeywordCoverage {
            total_keywords,
            covered_count,
            coverage_percentage: stable_percentage(covered_count, total_keywords),
            covered_keywords,
            missed_keywords,
        }
    }

    fn matches(&self, text: &str, keyword: &str) -> bool {
        match self.build_pattern(keyword) {
            Some(re) => re.is_match(text),
            None => {
                // Fall back to a plain substring test rather than losing the keyword.
                if self.options.case_sensitive {
                    text.contains(keyword)
                } else {
                    text.to_lowercase().contains(&keyword.to_lowercase())
                }
            }
        }
    }

    fn build_pattern(&self, keyword: &str) -> Option<Regex> {
        let variants = if self.options.plural_tolerance {
            plural_variants(keyword)
        } else {
            vec![keyword.to_string()]
        };

        let alternation = variants
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");

        // The regex crate has no lookaround, so the boundary is spelled out.
        let pattern = format!(r"(?:^|[^\w])(?:{alternation})(?:$|[^\w])");

        RegexBuilder::new(&pattern)
            .case_insensitive(!self.options.case_sensitive)
            .build()
            .map_err(|e| warn!("Keyword pattern for {keyword:?} failed to compile: {e}"))
            .ok()
    }
}

/// A keyword ending in "s" also matches its singular, and vice versa.
fn plural_variants(keyword: &str) -> Vec<String> {
    let mut variants = vec![keyword.to_string()];
    let last_is_alpha = keyword.chars().last().is_some_and(|c| c.is_alphabetic());
    if !last_is_alpha {
        return variants;
    }

    if let Some(singular) = keyword
        .strip_suffix('s')
        .or_else(|| keyword.strip_suffix('S'))
    {
        if !singular.is_empty() {
            variants.push(singular.to_string());
        }
    } else {
        variants.push(format!("{keyword}s"));
    }
    variants
}

fn dedup_keywords(keywords: &[String], case_sensitive: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| {
            let key = if case_sensitive {
                k.to_string()
            } else {
                k.to_lowercase()
            };
            seen.insert(key)
        })
        .map(str::to_string)
        .collect()
}

/// Percentage with two decimals computed on integers, so 1/8 is always 12.50
/// and never 12.499999.
fn stable_percentage(covered: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let covered = covered as u64;
    let total = total as u64;
    let basis_points = (covered * 10_000 + total / 2) / total;
    basis_points as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kws(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_keywords_returns_zero_coverage() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze("anything at all", &[]);
        assert_eq!(coverage.total_keywords, 0);
        assert_eq!(coverage.covered_count, 0);
        assert_eq!(coverage.coverage_percentage, 0.0);
    }

    #[test]
    fn test_blank_keywords_are_ignored() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze("rust", &kws(&["  ", ""]));
        assert_eq!(coverage.total_keywords, 0);
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze("Built services in RUST and Go", &kws(&["rust", "go"]));
        assert_eq!(coverage.covered_count, 2);
        assert_eq!(coverage.coverage_percentage, 100.0);
    }

    #[test]
    fn test_case_sensitive_option() {
        let analyzer = KeywordCoverageAnalyzer::new(MatchOptions {
            case_sensitive: true,
            plural_tolerance: false,
        });
        let coverage = analyzer.analyze("Built services in RUST", &kws(&["rust"]));
        assert_eq!(coverage.covered_count, 0);
        assert_eq!(coverage.missed_keywords, kws(&["rust"]));
    }

    #[test]
    fn test_word_boundary_prevents_substring_match() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze("Worked at google on search", &kws(&["go"]));
        assert_eq!(coverage.covered_count, 0);
    }

    #[test]
    fn test_symbols_inside_keywords_match() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze(
            "Wrote C++ and Node.js tooling, plus CI/CD pipelines.",
            &kws(&["c++", "node.js", "ci/cd"]),
        );
        assert_eq!(coverage.covered_count, 3);
    }

    #[test]
    fn test_plural_tolerance_both_directions() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze(
            "Designed a microservice and maintained many databases",
            &kws(&["microservices", "database"]),
        );
        assert_eq!(coverage.covered_count, 2);
    }

    #[test]
    fn test_plural_tolerance_disabled() {
        let analyzer = KeywordCoverageAnalyzer::new(MatchOptions {
            case_sensitive: false,
            plural_tolerance: false,
        });
        let coverage = analyzer.analyze("Designed a microservice", &kws(&["microservices"]));
        assert_eq!(coverage.covered_count, 0);
    }

    #[test]
    fn test_duplicate_keywords_counted_once() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let coverage = analyzer.analyze("rust", &kws(&["Rust", "rust", "RUST"]));
        assert_eq!(coverage.total_keywords, 1);
        assert_eq!(coverage.covered_keywords, kws(&["Rust"]));
    }

    #[test]
    fn test_stable_percentage_rounds_half_up() {
        assert_eq!(stable_percentage(1, 8), 12.5);
        assert_eq!(stable_percentage(1, 3), 33.33);
        assert_eq!(stable_percentage(2, 3), 66.67);
        assert_eq!(stable_percentage(0, 5), 0.0);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let analyzer = KeywordCoverageAnalyzer::default();
        let text = "Kubernetes, Terraform and AWS experience";
        let keywords = kws(&["kubernetes", "aws", "gcp"]);
        assert_eq!(
            analyzer.analyze(text, &keywords),
            analyzer.analyze(text, &keywords)
        );
    }
}
