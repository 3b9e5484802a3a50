//! Worker pool draining the retry queue.
//!
//! Workers are the only place where the outcome of a reconcile turns into a
//! queue decision: success forgets the key's backoff, failure requeues it
//! with a longer delay. A worker never exits on an error, only on shutdown.

use crate::error::ControllerError;
use crate::queue::RetryQueue;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one work key
#[async_trait]
pub trait KeyProcessor: Send + Sync {
    async fn process_key(&self, key: &str) -> Result<(), ControllerError>;
}

/// Fixed-size set of workers
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawns `count` workers pulling from `queue`
    pub fn start(
        count: usize,
        queue: Arc<RetryQueue>,
        processor: Arc<dyn KeyProcessor>,
        stop: CancellationToken,
    ) -> Self {
        let mut workers = JoinSet::new();
        for id in 0..count {
            workers.spawn(run_worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&processor),
                stop.clone(),
            ));
        }
        info!("Started {} workers", count);
        Self { workers }
    }

    /// Waits until every worker has exited.
    ///
    /// Workers exit once the queue is shut down and drained.
    pub async fn join(mut self) {
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                error!("Worker task failed: {}", e);
            }
        }
        info!("All workers stopped");
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<RetryQueue>,
    processor: Arc<dyn KeyProcessor>,
    stop: CancellationToken,
) {
    debug!("Worker {} started", id);
    while let Some(key) = queue.get().await {
        if stop.is_cancelled() {
            debug!("Worker {} dropping {} queued at shutdown", id, key);
            queue.done(&key);
            continue;
        }
        let result = process_one(processor.as_ref(), &key, &stop).await;
        match result {
            Ok(()) => {
                queue.forget(&key);
                queue.done(&key);
            }
            Err(ControllerError::Cancelled) => {
                warn!("Reconciliation of {} interrupted by shutdown", key);
                queue.done(&key);
            }
            Err(e) if e.is_conflict() => {
                warn!("Conflict syncing MysqlCluster {}, requeuing: {}", key, e);
                queue.done(&key);
                queue.add_rate_limited(&key);
            }
            Err(e) => {
                error!(
                    "Error syncing MysqlCluster {} (attempt {}), requeuing: {}",
                    key,
                    queue.num_requeues(&key) + 1,
                    e
                );
                queue.done(&key);
                queue.add_rate_limited(&key);
            }
        }
    }
    debug!("Worker {} exiting", id);
}

async fn process_one(
    processor: &dyn KeyProcessor,
    key: &str,
    stop: &CancellationToken,
) -> Result<(), ControllerError> {
    let work = AssertUnwindSafe(processor.process_key(key)).catch_unwind();
    tokio::select! {
        () = stop.cancelled() => Err(ControllerError::Cancelled),
        res = work => res.unwrap_or_else(|panic| {
            Err(ControllerError::Panic(panic_message(&*panic)))
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ExponentialBackoff;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Fails each key a configurable number of times, then succeeds
    struct Flaky {
        failures: Mutex<HashMap<String, usize>>,
        calls: AtomicUsize,
        panic_on: Option<String>,
    }

    #[async_trait]
    impl KeyProcessor for Flaky {
        async fn process_key(&self, key: &str) -> Result<(), ControllerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.as_deref() == Some(key) {
                panic!("boom");
            }
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(key) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(ControllerError::SecretNotFound("default/a-secret".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    fn queue() -> Arc<RetryQueue> {
        Arc::new(RetryQueue::new(
            "test",
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(10)),
        ))
    }

    #[tokio::test]
    async fn test_failed_key_is_retried_until_success() {
        let queue = queue();
        let processor = Arc::new(Flaky {
            failures: Mutex::new(HashMap::from([("default/a".to_string(), 2)])),
            calls: AtomicUsize::new(0),
            panic_on: None,
        });
        let stop = CancellationToken::new();
        let pool = WorkerPool::start(2, Arc::clone(&queue), processor.clone(), stop.clone());

        queue.add("default/a");
        timeout(Duration::from_secs(2), async {
            while processor.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.num_requeues("default/a"), 0);

        queue.shut_down();
        timeout(Duration::from_secs(1), pool.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_worker() {
        let queue = queue();
        let processor = Arc::new(Flaky {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            panic_on: Some("default/bad".to_string()),
        });
        let stop = CancellationToken::new();
        let pool = WorkerPool::start(1, Arc::clone(&queue), processor.clone(), stop.clone());

        queue.add("default/bad");
        queue.add("default/good");
        timeout(Duration::from_secs(2), async {
            while processor.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(queue.num_requeues("default/bad") >= 1);

        queue.shut_down();
        timeout(Duration::from_secs(1), pool.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_drained_after_stop_are_not_processed() {
        let queue = queue();
        let processor = Arc::new(Flaky {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            panic_on: None,
        });
        let stop = CancellationToken::new();
        stop.cancel();
        let pool = WorkerPool::start(2, Arc::clone(&queue), processor.clone(), stop);

        queue.add("default/a");
        queue.add("default/b");
        queue.shut_down();
        timeout(Duration::from_secs(1), pool.join()).await.unwrap();

        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.num_requeues("default/a"), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_workers_exit_after_shutdown() {
        let queue = queue();
        let processor = Arc::new(Flaky {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            panic_on: None,
        });
        let pool = WorkerPool::start(4, Arc::clone(&queue), processor, CancellationToken::new());
        queue.shut_down();
        timeout(Duration::from_secs(1), pool.join()).await.unwrap();
    }
}
