//! Bounded pools for background units of work.

use feedline_core::{FeedError, FeedResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, Instrument};

/// Runs units of work on spawned tasks, at most `concurrency` at a time.
///
/// Tasks wait for a slot inside the spawned task, so spawning never blocks
/// the caller.
#[derive(Debug, Clone)]
pub struct TaskPool {
    name: &'static str,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    /// Create a pool; a concurrency of zero is raised to one.
    #[must_use]
    pub fn new(name: &'static str, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name,
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Units of work currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.semaphore.available_permits()
    }

    /// Spawn one unit of work.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(
            async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                task.await
            }
            .instrument(tracing::info_span!("task", pool = self.name)),
        )
    }

    /// Spawn a unit of work nobody waits for; its failure is only logged.
    pub fn spawn_detached<F, T>(&self, what: &'static str, task: F)
    where
        F: Future<Output = FeedResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.name;
        self.spawn(async move {
            if let Err(e) = task.await {
                error!(pool, task = what, error = %e, "Background task failed");
            }
        });
    }

    /// Run every task on the pool and wait for all of them.
    ///
    /// Results come back in input order. A panicking task yields an
    /// internal error in its slot instead of failing the others.
    pub async fn join_all<F, T>(&self, tasks: impl IntoIterator<Item = F>) -> Vec<FeedResult<T>>
    where
        F: Future<Output = FeedResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = tasks.into_iter().map(|task| self.spawn(task)).collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|e| Err(FeedError::internal(format!("task aborted: {e}")))),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_all_keeps_order_and_isolates_failures() {
        let pool = TaskPool::new("test", 2);
        let results = pool
            .join_all((0..4).map(|n| async move {
                if n == 2 {
                    Err(FeedError::store("down"))
                } else {
                    Ok(n)
                }
            }))
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(*results[0].as_ref().unwrap(), 0);
        assert!(results[2].is_err());
        assert_eq!(*results[3].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = TaskPool::new("test", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let results = pool.join_all(tasks).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let pool = TaskPool::new("test", 0);
        assert_eq!(pool.concurrency(), 1);
        let value = pool.spawn(async { 5 }).await.unwrap();
        assert_eq!(value, 5);
    }
}
