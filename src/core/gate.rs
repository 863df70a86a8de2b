//! Concurrency gate.
//!
//! Bounds how many pipelines run at once. Excess requests wait for a permit
//! in FIFO order (tokio's semaphore is fair); nothing is rejected because of
//! the limit alone. The permit is held for the whole pipeline, including the
//! time spent waiting on child processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use crate::error::PipelineError;

/// Default number of simultaneous pipelines
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Bounded admission to the pipeline
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT)
    }
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `limit` requests (minimum 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a permit
    pub async fn admit(&self) -> Result<Permit, PipelineError> {
        let requested_at = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::GateClosed)?;

        let waited = requested_at.elapsed();
        debug!(
            waited_ms = waited.as_millis() as u64,
            in_flight = self.in_flight(),
            "Admitted request"
        );
        Ok(Permit {
            _permit: permit,
            waited,
        })
    }

    /// Take a permit only if one is free right now
    pub fn try_admit(&self) -> Result<Option<Permit>, PipelineError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(Permit {
                _permit: permit,
                waited: Duration::ZERO,
            })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PipelineError::GateClosed),
        }
    }

    /// Return a permit. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Stop admitting. Waiting and future `admit` calls fail with
    /// [`PipelineError::GateClosed`]; permits already held stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }
}

/// Right to run one pipeline. Released on drop.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl Permit {
    /// How long the request queued before admission
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
