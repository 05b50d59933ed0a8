//! Test doubles shared by the unit tests of several modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::metrics::{MetricEvent, MetricsSink};
use crate::pool::{PoolConfig, ResourcePool};
use crate::providers::{
    EmbeddingProvider, ExternalServiceError, GapNarrative, GapNarrativeGenerator, HandleFactory,
    NarrativeParams, ProviderHandle, ServiceErrorKind,
};

/// Hands out `usize` ids starting at 0.
#[derive(Default)]
pub struct CountingFactory {
    next: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingFactory {
    pub fn failing_first(n: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(n),
        }
    }

    pub fn created(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandleFactory<usize> for CountingFactory {
    async fn create(&self) -> anyhow::Result<usize> {
        if take_one(&self.failures_left) {
            anyhow::bail!("factory unavailable");
        }
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Decrements `counter` if positive; true when it did.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    FailFirst(usize, ServiceErrorKind),
    AlwaysFail(ServiceErrorKind),
    PanicFirst(usize),
    Hang,
    UnevenDimensions,
}

/// Deterministic embedding provider: the same text always maps to the same
/// non-zero vector.
pub struct MockEmbeddings {
    behavior: Behavior,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockEmbeddings {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn succeeding() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    pub fn failing_first(n: usize, kind: ServiceErrorKind) -> Self {
        Self::with_behavior(Behavior::FailFirst(n, kind))
    }

    pub fn always_failing(kind: ServiceErrorKind) -> Self {
        Self::with_behavior(Behavior::AlwaysFail(kind))
    }

    pub fn panicking_first(n: usize) -> Self {
        Self::with_behavior(Behavior::PanicFirst(n))
    }

    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    /// Alternates between 16- and 15-dimensional vectors from call to call.
    pub fn uneven_dimensions() -> Self {
        Self::with_behavior(Behavior::UnevenDimensions)
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        Sha256::digest(text.as_bytes())
            .iter()
            .take(16)
            .map(|b| f32::from(*b) / 255.0 + 0.01)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn create_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::FailFirst(n, kind) if call < n => {
                return Err(ExternalServiceError::new("embedding", kind, "scripted failure"));
            }
            Behavior::AlwaysFail(kind) => {
                return Err(ExternalServiceError::new("embedding", kind, "scripted failure"));
            }
            Behavior::PanicFirst(n) if call < n => panic!("scripted embedding panic"),
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::UnevenDimensions => {
                let dims = 16 - call % 2;
                return Ok(texts
                    .iter()
                    .map(|t| {
                        let mut v = Self::vector_for(t);
                        v.truncate(dims);
                        v
                    })
                    .collect());
            }
            _ => {}
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

pub fn sample_narrative() -> GapNarrative {
    GapNarrative {
        strengths: vec!["Strong Rust background".into()],
        gaps: vec!["No Kubernetes experience".into()],
        improvements: vec!["Mention container orchestration work".into()],
        assessment: "Good fit with one notable gap.".into(),
    }
}

pub struct MockNarrative {
    behavior: Behavior,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockNarrative {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    pub fn always_failing(kind: ServiceErrorKind) -> Self {
        Self::with_behavior(Behavior::AlwaysFail(kind))
    }

    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl GapNarrativeGenerator for MockNarrative {
    async fn generate(
        &self,
        prompt: &str,
        _params: NarrativeParams,
    ) -> Result<GapNarrative, ExternalServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match self.behavior {
            Behavior::FailFirst(n, kind) if call < n => {
                Err(ExternalServiceError::new("narrative", kind, "scripted failure"))
            }
            Behavior::AlwaysFail(kind) => {
                Err(ExternalServiceError::new("narrative", kind, "scripted failure"))
            }
            Behavior::PanicFirst(n) if call < n => panic!("scripted narrative panic"),
            Behavior::Hang => std::future::pending().await,
            _ => Ok(sample_narrative()),
        }
    }
}

/// Every handle shares the same two mocks, so call counts are global.
pub struct MockHandleFactory {
    pub embeddings: Arc<MockEmbeddings>,
    pub narrative: Arc<MockNarrative>,
}

#[async_trait]
impl HandleFactory<ProviderHandle> for MockHandleFactory {
    async fn create(&self) -> anyhow::Result<ProviderHandle> {
        Ok(ProviderHandle {
            embeddings: self.embeddings.clone(),
            narrative: self.narrative.clone(),
        })
    }
}

pub async fn provider_pool(
    embeddings: Arc<MockEmbeddings>,
    narrative: Arc<MockNarrative>,
    max_size: usize,
) -> ResourcePool<ProviderHandle> {
    ResourcePool::new(
        Arc::new(MockHandleFactory {
            embeddings,
            narrative,
        }),
        PoolConfig {
            min_size: 1,
            max_size,
            acquire_timeout: Duration::from_secs(5),
        },
    )
    .await
}

/// Keeps every event in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn emit(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}
