//! Worker pool for the heavy parts of the pipeline.
//!
//! A semaphore caps how many transfers and transcodes run at once across all
//! sessions. Blocking jobs go to tokio's blocking threads; async jobs (HTTP
//! streaming) get their own task. Either way the result comes back through a
//! `JoinHandle` that the pipeline awaits next to its progress channel.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::download::error::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held by a job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs a blocking closure on a blocking thread once a permit is free.
    pub fn submit_blocking<T, F>(&self, job: F) -> JoinHandle<Result<T, WorkerError>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let permit = permits.acquire_owned().await.map_err(|_| WorkerError::Closed)?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(WorkerError::from)
        })
    }

    /// Runs a non-blocking future on its own task once a permit is free.
    pub fn submit<T, Fut>(&self, job: Fut) -> JoinHandle<Result<T, WorkerError>>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| WorkerError::Closed)?;
            Ok(job.await)
        })
    }

    /// Convenience for callers that have nothing to do while waiting.
    pub async fn run_blocking<T, F>(&self, job: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_blocking(job).await.map_err(WorkerError::from)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_blocking_job_returns_value() {
        let pool = WorkerPool::new(2);
        let value = pool.run_blocking(|| 6 * 7).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.limit(), 1);
        assert_eq!(pool.submit(async { "done" }).await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_limit_caps_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit_blocking(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run_blocking(|| panic!("boom")).await;
        assert!(matches!(result, Err(WorkerError::Panicked(_))));
        // Permit released despite the panic.
        assert_eq!(pool.run_blocking(|| 1).await.unwrap(), 1);
    }
}
