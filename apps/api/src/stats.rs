//! Process-wide request counters. All fields are atomics, so `snapshot`
//! never blocks a writer (and vice versa).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::retry::RetryCategory;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub full_successes: u64,
    pub partial_successes: u64,
    pub index_failures: u64,
    pub total_failures: u64,
    pub per_category_failures: BTreeMap<RetryCategory, u64>,
}

impl ServiceStats {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct StatsTracker {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    full_successes: AtomicU64,
    partial_successes: AtomicU64,
    index_failures: AtomicU64,
    total_failures: AtomicU64,
    category_failures: [AtomicU64; 5],
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buckets one request outcome. `index_success` covers the similarity and
    /// coverage work; `gap_success` covers the narrative.
    pub fn record_request(&self, index_success: bool, gap_success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let bucket = match (index_success, gap_success) {
            (true, true) => &self.full_successes,
            (true, false) => &self.partial_successes,
            (false, true) => &self.index_failures,
            (false, false) => &self.total_failures,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure_categories(&self, categories: &[RetryCategory]) {
        for category in categories {
            self.category_failures[category.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceStats {
        let per_category_failures = RetryCategory::ALL
            .iter()
            .map(|c| (*c, self.category_failures[c.index()].load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();

        ServiceStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            full_successes: self.full_successes.load(Ordering::Relaxed),
            partial_successes: self.partial_successes.load(Ordering::Relaxed),
            index_failures: self.index_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            per_category_failures,
        }
    }
}
