//! Deduplicating, rate-limited work queue.
//!
//! The queue guarantees that a key is handed to at most one worker at a time:
//! a key added while it is being processed is marked dirty and re-delivered
//! exactly once after `done`. Failed keys come back through `add_rate_limited`
//! after an exponential delay tracked per key.

use crate::backoff::ExponentialBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-add pending while in flight)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    /// Per-key failure counts, cleared by `forget`
    retries: HashMap<String, u32>,
    shutting_down: bool,
}

/// Work queue of "namespace/name" keys
#[derive(Debug)]
pub struct RetryQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ExponentialBackoff,
    /// Cancels pending delayed re-adds on shutdown
    delayed: CancellationToken,
}

impl RetryQueue {
    /// Creates an empty queue
    pub fn new(name: impl Into<String>, backoff: ExponentialBackoff) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
            delayed: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `key` unless it is already pending.
    ///
    /// If the key is being processed it is only marked dirty and will be
    /// re-queued by `done`. Ignored after shutdown.
    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.to_string()) {
            trace!("{}: {} already pending", self.name, key);
            return;
        }
        if state.processing.contains(key) {
            trace!("{}: {} in flight, marked dirty", self.name, key);
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once `shut_down` has been called and the queue is empty.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent add/shutdown cannot be missed
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer processed, re-queueing it if it went dirty meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clears the failure count of `key` (call after a successful reconcile)
    pub fn forget(&self, key: &str) {
        self.lock().retries.remove(key);
    }

    /// Re-adds `key` after a delay that grows with its failure count.
    ///
    /// Returns the delay, or `None` when the queue is shutting down.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) -> Option<Duration> {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return None;
            }
            let failures = state.retries.entry(key.to_string()).or_insert(0);
            let delay = self.backoff.delay_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        debug!("{}: requeueing {} in {:?}", self.name, key, delay);
        self.add_after(key, delay);
        Some(delay)
    }

    /// Re-adds `key` once `delay` has elapsed, unless the queue shuts down first
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => queue.add(&key),
                () = queue.delayed.cancelled() => {}
            }
        });
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().retries.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when no key is waiting
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops intake; pending `get` calls drain what is queued, then return `None`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.delayed.cancel();
        self.notify.notify_waiters();
    }
}
