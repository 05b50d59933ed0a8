//! Fire-and-forget pipeline events. A sink must never block or fail the
//! pipeline; implementations drop events they cannot deliver.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::errors::Phase;
use crate::retry::RetryCategory;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricEvent {
    CacheLookup { namespace: &'static str, hit: bool },
    PhaseCompleted { phase: Phase, elapsed_ms: u64 },
    PhaseFailed { phase: Phase, categories: Vec<RetryCategory> },
    PartialResult { similarity_raw: f64 },
    RequestCompleted { partial: bool, elapsed_ms: u64 },
}

impl MetricEvent {
    pub fn phase_completed(phase: Phase, elapsed: Duration) -> Self {
        Self::PhaseCompleted {
            phase,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: MetricEvent);
}

/// Default sink: events become debug-level log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, event: MetricEvent) {
        debug!(?event, "metric");
    }
}
