//! Limits how many independent runs a host process executes at once.
//!
//! There is no parallelism inside a run; this only gates whole runs.

use std::sync::Arc;

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::RunError;

#[derive(Debug, Clone)]
pub struct RunLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl RunLimiter {
    /// At least one run is always allowed.
    pub fn new(max_concurrent_runs: usize) -> Self {
        let permits = max_concurrent_runs.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot; the slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, RunError> {
        if self.available() == 0 {
            debug!("Run limit of {} reached, waiting for a slot", self.permits);
        }
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RunError::LimiterClosed)
    }
}

impl Default for RunLimiter {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}
