use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{AnalysisError, TimeoutScope};

/// The instant a scope must finish by, and which budget set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub scope: TimeoutScope,
    pub budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration, scope: TimeoutScope) -> Self {
        Self {
            at: Instant::now() + budget,
            scope,
            budget,
        }
    }

    /// The earlier of a fresh `budget` for `scope` and `outer`. When the
    /// outer deadline is sooner, it keeps its own scope.
    pub fn nested(outer: Deadline, budget: Duration, scope: TimeoutScope) -> Self {
        let inner = Self::after(budget, scope);
        if outer.at < inner.at {
            outer
        } else {
            inner
        }
    }

    pub fn timeout_error(&self) -> AnalysisError {
        AnalysisError::Timeout {
            scope: self.scope,
            budget: self.budget,
        }
    }
}
