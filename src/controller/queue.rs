//! # Work Queue
//!
//! Deduplicating, rate-limited key queue plus the worker pool that drains it.
//!
//! - A key added while it is already queued is coalesced into the queued entry.
//! - A key is handed to at most one worker at a time; adding it while it is
//!   being processed marks it dirty and it is re-queued by [`WorkQueue::done`].
//! - Failed keys are re-queued with per-key exponential backoff until they
//!   exceed the configured requeue limit, then dropped with an error log.

use crate::controller::backoff::ExponentialBackoff;
use crate::error::Result;
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounds shared by every queue key
pub trait QueueKey: Clone + Eq + Hash + Display + Send + Sync + 'static {}

impl<K> QueueKey for K where K: Clone + Eq + Hash + Display + Send + Sync + 'static {}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

impl<K: QueueKey> WorkQueue<K> {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after its per-key backoff and count the failure
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        debug!(key = %key, delay_ms = delay.as_millis(), "requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Times `key` has been re-queued through [`Self::add_rate_limited`]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the backoff of `key`
    pub fn forget(&self, key: &K) {
        self.state().failures.remove(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish processing `key`; re-queues it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys. Keys already being processed finish normally.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys waiting to be processed
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Processes one key taken from the queue
#[async_trait]
pub trait KeyHandler<K>: Send + Sync + 'static {
    async fn handle(&self, key: &K) -> Result<()>;
}

/// Spawn `workers` tasks draining `queue` into `handler`
///
/// A key whose handler fails is re-queued with backoff until it has been
/// re-queued `max_requeues` times, after which it is dropped.
pub fn run_workers<K, H>(
    queue: &Arc<WorkQueue<K>>,
    handler: &Arc<H>,
    workers: usize,
    max_requeues: u32,
) -> Vec<JoinHandle<()>>
where
    K: QueueKey,
    H: KeyHandler<K>,
{
    info!(workers, max_requeues, "starting queue workers");
    (0..workers)
        .map(|worker| {
            let queue = Arc::clone(queue);
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                while process_next(&queue, handler.as_ref(), max_requeues).await {}
                debug!(worker, "queue worker stopped");
            })
        })
        .collect()
}

/// Handle one key; returns `false` once the queue has shut down
pub async fn process_next<K, H>(queue: &Arc<WorkQueue<K>>, handler: &H, max_requeues: u32) -> bool
where
    K: QueueKey,
    H: KeyHandler<K> + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };

    match handler.handle(&key).await {
        Ok(()) => queue.forget(&key),
        Err(e) if queue.num_requeues(&key) < max_requeues => {
            warn!(key = %key, error = %e, "failed to process key, requeueing");
            metrics::increment_requeues_total("error");
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            error!(key = %key, error = %e, "dropping key out of the queue after {max_requeues} requeues");
            metrics::increment_dropped_keys();
            queue.forget(&key);
        }
    }
    queue.done(&key);
    metrics::set_queue_depth(queue.len());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        )))
    }

    #[tokio::test]
    async fn test_add_coalesces_queued_keys() {
        let q = queue();
        q.add("demo/a".to_string());
        q.add("demo/a".to_string());
        q.add("demo/b".to_string());
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await.as_deref(), Some("demo/a"));
        assert_eq!(q.get().await.as_deref(), Some("demo/b"));
    }

    #[tokio::test]
    async fn test_key_added_while_processing_is_requeued_on_done() {
        let q = queue();
        q.add("demo/a".to_string());
        let key = q.get().await.unwrap();

        q.add(key.clone());
        assert_eq!(q.len(), 0, "a key in flight must not be handed out twice");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let q = queue();
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
        q.add("demo/a".to_string());
        assert!(q.is_empty());
    }

    struct FailingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl KeyHandler<String> for FailingHandler {
        async fn handle(&self, _key: &String) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("boom".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_key_is_dropped_after_max_requeues() {
        let q = queue();
        let handler = FailingHandler {
            calls: AtomicU32::new(0),
        };
        q.add("demo/a".to_string());

        for _ in 0..3 {
            assert!(process_next(&q, &handler, 2).await);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(q.num_requeues(&"demo/a".to_string()), 0, "dropped keys are forgotten");
        assert!(q.is_empty());
    }
}
