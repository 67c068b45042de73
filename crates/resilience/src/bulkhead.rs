//! Per-provider bulkhead: a bounded worker pool plus a bounded wait queue.
//!
//! Admission is two-stage: `workers` permits execute concurrently, and at
//! most `queue` further calls may wait for a permit. Anything beyond that is
//! rejected immediately rather than silently delayed.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {dashmap::DashMap, tokio::sync::Semaphore};

use crate::error::ResilienceError;

#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub workers: usize,
    pub queue: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue: 100,
        }
    }
}

/// A single provider's bulkhead.
pub struct Bulkhead {
    provider: String,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    queue_limit: usize,
}

impl Bulkhead {
    #[must_use]
    pub fn new(provider: impl Into<String>, config: &BulkheadConfig) -> Self {
        Self {
            provider: provider.into(),
            permits: Arc::new(Semaphore::new(config.workers)),
            waiting: AtomicUsize::new(0),
            queue_limit: config.queue,
        }
    }

    /// Acquire an execution slot, waiting in the bounded queue if necessary.
    ///
    /// Returns `BulkheadFull` without waiting when the queue is already at
    /// capacity.
    pub async fn acquire(&self) -> Result<BulkheadPermit, ResilienceError> {
        // Fast path: a worker slot is free.
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        // Slow path: join the wait queue if there is room.
        let waiting = self.waiting.fetch_add(1, Ordering::AcqRel);
        if waiting >= self.queue_limit {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            return Err(ResilienceError::BulkheadFull {
                provider: self.provider.clone(),
            });
        }

        let acquired = Arc::clone(&self.permits).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        match acquired {
            Ok(permit) => Ok(BulkheadPermit { _permit: permit }),
            // The semaphore is never closed while the bulkhead is alive.
            Err(_) => Err(ResilienceError::BulkheadFull {
                provider: self.provider.clone(),
            }),
        }
    }

    /// Currently available worker slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// RAII execution slot; dropping it frees the worker.
pub struct BulkheadPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Bulkheads for all providers, created lazily with a shared config.
pub struct BulkheadRegistry {
    config: BulkheadConfig,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
}

impl BulkheadRegistry {
    #[must_use]
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            bulkheads: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, provider: &str) -> Arc<Bulkhead> {
        self.bulkheads
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::new(provider, &self.config)))
            .clone()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_worker_count() {
        let bulkhead = Bulkhead::new("github", &BulkheadConfig {
            workers: 2,
            queue: 0,
        });
        let a = bulkhead.acquire().await.unwrap();
        let _b = bulkhead.acquire().await.unwrap();
        assert!(matches!(
            bulkhead.acquire().await,
            Err(ResilienceError::BulkheadFull { .. })
        ));

        drop(a);
        let _c = bulkhead.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn queued_caller_runs_after_a_slot_frees() {
        let bulkhead = Arc::new(Bulkhead::new("github", &BulkheadConfig {
            workers: 1,
            queue: 1,
        }));
        let held = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.acquire().await.map(drop) })
        };
        tokio::task::yield_now().await;

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn queue_overflow_rejects_without_waiting() {
        let bulkhead = Arc::new(Bulkhead::new("github", &BulkheadConfig {
            workers: 1,
            queue: 1,
        }));
        let _held = bulkhead.acquire().await.unwrap();

        // Fill the queue with one waiter.
        let _waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move {
                let permit = bulkhead.acquire().await;
                // Keep the permit pending until the test ends.
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                drop(permit);
            })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            bulkhead.acquire().await,
            Err(ResilienceError::BulkheadFull { .. })
        ));
    }

    #[tokio::test]
    async fn registry_shares_one_bulkhead_per_provider() {
        let registry = BulkheadRegistry::new(BulkheadConfig {
            workers: 1,
            queue: 0,
        });
        let a = registry.get("github");
        let b = registry.get("github");
        let _permit = a.acquire().await.unwrap();
        assert!(matches!(
            b.acquire().await,
            Err(ResilienceError::BulkheadFull { .. })
        ));
        // A different provider is unaffected.
        let _other = registry.get("gitlab").acquire().await.unwrap();
    }
}
