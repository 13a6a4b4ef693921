//! Process-wide ceiling on concurrent upstream fetches.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A fixed concurrency budget shared by every request in the process.
/// Cloning shares the budget.
#[derive(Debug, Clone)]
pub struct FetchThrottle {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl FetchThrottle {
    /// A throttle admitting `limit` concurrent fetches (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        FetchThrottle {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `fut` once a permit is free, holding the permit until it completes.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquisition only waits.
        let _permit = self.permits.acquire().await.ok();
        fut.await
    }
}

impl Default for FetchThrottle {
    fn default() -> Self {
        FetchThrottle::new(10)
    }
}
