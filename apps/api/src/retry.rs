//! Adaptive retry — classifies a failure, looks up the policy for its
//! category and retries only the failing sub-operation.
//!
//! Classification is a pattern match over closed error enums (`Classify`).
//! The only string inspection lives in `ServiceErrorKind::from_message`, at
//! the provider boundary.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::AnalysisError;
use crate::providers::{ExternalServiceError, ServiceErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCategory {
    EmptyFields,
    Timeout,
    RateLimit,
    AuthError,
    Unknown,
}

impl RetryCategory {
    pub const ALL: [RetryCategory; 5] = [
        Self::EmptyFields,
        Self::Timeout,
        Self::RateLimit,
        Self::AuthError,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyFields => "empty_fields",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::AuthError => "auth_error",
            Self::Unknown => "unknown",
        }
    }

    /// Position in `ALL`; used for fixed-size counter arrays.
    pub fn index(&self) -> usize {
        match self {
            Self::EmptyFields => 0,
            Self::Timeout => 1,
            Self::RateLimit => 2,
            Self::AuthError => 3,
            Self::Unknown => 4,
        }
    }
}

impl std::fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the retry layer can classify.
pub trait Classify {
    fn retry_category(&self) -> RetryCategory;
}

impl Classify for ServiceErrorKind {
    fn retry_category(&self) -> RetryCategory {
        match self {
            ServiceErrorKind::Timeout => RetryCategory::Timeout,
            ServiceErrorKind::RateLimit => RetryCategory::RateLimit,
            ServiceErrorKind::EmptyResponse => RetryCategory::EmptyFields,
            ServiceErrorKind::Auth => RetryCategory::AuthError,
            ServiceErrorKind::Server | ServiceErrorKind::Generic => RetryCategory::Unknown,
        }
    }
}

impl Classify for ExternalServiceError {
    fn retry_category(&self) -> RetryCategory {
        self.kind.retry_category()
    }
}

/// Free-function form of the classifier.
pub fn classify<E: Classify + ?Sized>(error: &E) -> RetryCategory {
    error.retry_category()
}

// ────────────────────────────────────────────────────────────────────────────
// Policies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    None,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub category: RetryCategory,
    max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(
        category: RetryCategory,
        max_attempts: u32,
        backoff: Backoff,
        base_delay: Duration,
    ) -> Self {
        Self {
            category,
            max_attempts: max_attempts.max(1),
            backoff,
            base_delay,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let delay = match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear => self.base_delay.saturating_mul(retry),
            Backoff::Exponential => {
                let factor = self.backoff_factor.powi(retry as i32 - 1);
                Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
                    .unwrap_or(self.max_delay)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Category → policy lookup. Missing categories fall back to a single attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicyTable {
    policies: HashMap<RetryCategory, RetryPolicy>,
}

impl Default for RetryPolicyTable {
    fn default() -> Self {
        let policies = [
            RetryPolicy::new(
                RetryCategory::EmptyFields,
                2,
                Backoff::Linear,
                Duration::from_millis(100),
            ),
            RetryPolicy::new(
                RetryCategory::Timeout,
                3,
                Backoff::Exponential,
                Duration::from_millis(500),
            ),
            RetryPolicy::new(
                RetryCategory::RateLimit,
                5,
                Backoff::Exponential,
                Duration::from_secs(5),
            ),
            RetryPolicy::new(RetryCategory::AuthError, 1, Backoff::None, Duration::ZERO),
            RetryPolicy::new(RetryCategory::Unknown, 1, Backoff::None, Duration::ZERO),
        ];
        Self {
            policies: policies.into_iter().map(|p| (p.category, p)).collect(),
        }
    }
}

impl RetryPolicyTable {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policies.insert(policy.category, policy);
        self
    }

    pub fn policy(&self, category: RetryCategory) -> RetryPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| RetryPolicy::new(category, 1, Backoff::None, Duration::ZERO))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AdaptiveRetryStrategy {
    table: RetryPolicyTable,
}

impl AdaptiveRetryStrategy {
    pub fn new(table: RetryPolicyTable) -> Self {
        Self { table }
    }

    pub fn policy_for(&self, category: RetryCategory) -> RetryPolicy {
        self.table.policy(category)
    }

    /// Runs `operation` until it succeeds or the policy for its failure
    /// category is exhausted. The policy is re-read on every failure, so a
    /// timeout followed by a rate limit follows the rate-limit budget.
    ///
    /// Validation errors are returned untouched on the first failure. Every
    /// other exhausted failure comes back as `RetriesExhausted` carrying the
    /// attempt count.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{operation_name} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            let category = classify(&error);
            let policy = self.policy_for(category);

            if attempt >= policy.max_attempts() {
                if policy.max_attempts() > 1 {
                    warn!("{operation_name} failed after {attempt} attempts ({category}): {error}");
                }
                return Err(AnalysisError::RetriesExhausted {
                    operation: operation_name.to_string(),
                    category,
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = policy.delay_for(attempt);
            warn!(
                "{operation_name} attempt {attempt}/{} failed ({category}), retrying after {}ms: {error}",
                policy.max_attempts(),
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
