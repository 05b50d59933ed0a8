//! Resource Pool — bounded pool of reusable external-service handles.
//!
//! A semaphore with `max_size` permits bounds the number of active leases.
//! Idle handles wait in a LIFO stack; a new handle is created only when a
//! permit is held and the stack is empty, so the number of created handles
//! never exceeds `max_size` either.
//!
//! A `Lease` owns its permit and its handle. Dropping it (normal return, `?`
//! early exit, panic unwind, or the future being cancelled) puts the handle
//! back before the permit is released.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::AnalysisError;
use crate::providers::{ExternalServiceError, HandleFactory, ServiceErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub total_clients: usize,
    pub active_clients: usize,
    pub idle_clients: usize,
    /// Share of acquisitions served by an already-created handle.
    pub reuse_rate: f64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub peak_active: usize,
    pub prewarm_failures: u64,
}

struct PoolInner<H> {
    idle: Mutex<Vec<H>>,
    permits: Arc<Semaphore>,
    factory: Arc<dyn HandleFactory<H>>,
    config: PoolConfig,
    closed: AtomicBool,
    total_created: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    acquired: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    prewarm_failures: AtomicU64,
}

impl<H> PoolInner<H> {
    fn return_handle(&self, handle: H) {
        if self.closed.load(Ordering::Acquire) {
            // Shut down while the handle was lent out; close it now.
            self.total_created.fetch_sub(1, Ordering::AcqRel);
            drop(handle);
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    fn idle_len(&self) -> usize {
        match self.idle.lock() {
            Ok(idle) => idle.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn pop_idle(&self) -> Option<H> {
        match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        }
    }
}

pub struct ResourcePool<H> {
    inner: Arc<PoolInner<H>>,
}

impl<H> Clone for ResourcePool<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Send + 'static> ResourcePool<H> {
    /// Builds the pool and pre-warms `min_size` handles. A pre-warm failure
    /// is logged and counted; the missing handles are created on demand.
    pub async fn new(factory: Arc<dyn HandleFactory<H>>, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        let config = PoolConfig {
            min_size: config.min_size.min(max_size),
            max_size,
            ..config
        };

        let pool = Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(max_size)),
                permits: Arc::new(Semaphore::new(max_size)),
                factory,
                config,
                closed: AtomicBool::new(false),
                total_created: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                released: AtomicU64::new(0),
                prewarm_failures: AtomicU64::new(0),
            }),
        };
        pool.prewarm().await;
        pool
    }

    async fn prewarm(&self) {
        let inner = &self.inner;
        for _ in 0..inner.config.min_size {
            match inner.factory.create().await {
                Ok(handle) => {
                    inner.total_created.fetch_add(1, Ordering::AcqRel);
                    inner.return_handle(handle);
                }
                Err(e) => {
                    inner.prewarm_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Pool pre-warm failed, falling back to on-demand creation: {e:#}");
                }
            }
        }
        info!(
            "Client pool ready: {} pre-warmed, max {}",
            inner.idle_len(),
            inner.config.max_size
        );
    }

    /// Waits for a permit (bounded by `acquire_timeout`), then hands out an
    /// idle handle or creates a new one.
    pub async fn acquire(&self) -> Result<Lease<H>, AnalysisError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(AnalysisError::PoolClosed);
        }

        let wait = inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(wait, Arc::clone(&inner.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AnalysisError::PoolClosed),
            Err(_) => {
                warn!("Pool acquire timed out after {}ms", wait.as_millis());
                return Err(AnalysisError::ResourceExhausted { waited: wait });
            }
        };

        let handle = match inner.pop_idle() {
            Some(handle) => {
                inner.reused.fetch_add(1, Ordering::Relaxed);
                handle
            }
            None => {
                // The permit is dropped with this future on error or cancel.
                let handle = inner.factory.create().await.map_err(|e| {
                    ExternalServiceError::new(
                        "pool",
                        ServiceErrorKind::Generic,
                        format!("client handle creation failed: {e:#}"),
                    )
                })?;
                let created = inner.total_created.fetch_add(1, Ordering::AcqRel) + 1;
                debug!("Created pooled client handle #{created}");
                handle
            }
        };

        inner.acquired.fetch_add(1, Ordering::Relaxed);
        let active = inner.active.fetch_add(1, Ordering::AcqRel) + 1;
        inner.peak_active.fetch_max(active, Ordering::AcqRel);

        Ok(Lease {
            handle: Some(handle),
            acquired_at: Instant::now(),
            pool: Arc::clone(inner),
            _permit: permit,
        })
    }

    /// Explicit release; identical to dropping the lease.
    pub fn release(&self, lease: Lease<H>) {
        drop(lease);
    }

    /// Closes the pool: idle handles are dropped, waiters and later
    /// `acquire` calls fail with `PoolClosed`. Outstanding leases close
    /// their handle when returned.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.permits.close();
        let drained = match inner.idle.lock() {
            Ok(mut idle) => std::mem::take(&mut *idle),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        inner
            .total_created
            .fetch_sub(drained.len(), Ordering::AcqRel);
        info!("Client pool shut down, closed {} idle handles", drained.len());
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let acquired = inner.acquired.load(Ordering::Relaxed);
        let reused = inner.reused.load(Ordering::Relaxed);
        PoolStats {
            total_clients: inner.total_created.load(Ordering::Acquire),
            active_clients: inner.active.load(Ordering::Acquire),
            idle_clients: inner.idle_len(),
            reuse_rate: if acquired == 0 {
                0.0
            } else {
                reused as f64 / acquired as f64
            },
            total_acquired: acquired,
            total_released: inner.released.load(Ordering::Relaxed),
            peak_active: inner.peak_active.load(Ordering::Acquire),
            prewarm_failures: inner.prewarm_failures.load(Ordering::Relaxed),
        }
    }
}

/// A borrowed handle. Returned to the pool on drop.
pub struct Lease<H> {
    handle: Option<H>,
    acquired_at: Instant,
    pool: Arc<PoolInner<H>>,
    // Released after `Drop::drop` body runs, i.e. after the handle is back.
    _permit: OwnedSemaphorePermit,
}

impl<H> Lease<H> {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl<H> fmt::Debug for Lease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("handle", &self.handle.as_ref().map(|_| ".."))
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl<H> Deref for Lease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle
            .as_ref()
            .expect("lease handle is present until drop")
    }
}

impl<H> Drop for Lease<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.return_handle(handle);
        }
        self.pool.active.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.fetch_add(1, Ordering::Relaxed);
    }
}
