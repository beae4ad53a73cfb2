use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::Rng;
use tokio::sync::Notify;
use tracing::trace;

use crate::data_model::PlacementName;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Default)]
struct QueueInner {
    /// Keys ready to be handed to a worker, in arrival order.
    ready: VecDeque<PlacementName>,
    /// Keys known to the queue and not yet fully processed. Adding a key
    /// already here is a no-op.
    dirty: HashSet<PlacementName>,
    /// Keys currently held by a worker. A key is handed to at most one
    /// worker at a time; re-adds while processing are deferred until done.
    processing: HashSet<PlacementName>,
    /// Consecutive rate-limited requeues per key, cleared by forget.
    failures: HashMap<PlacementName, u32>,
    shut_down: bool,
}

/// Deduplicating work queue of placement keys with per-key exponential
/// backoff. Cycles for the same placement are serialized: a key checked out
/// by a worker is not handed out again until that worker calls `done`.
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue a key. A key already queued or pending re-queue is left
    /// alone; a key currently being processed is re-queued once its worker
    /// finishes.
    pub fn add(&self, key: PlacementName) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shut_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            return;
        }
        trace!(placement = key.get(), "enqueued placement");
        inner.ready.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue a key after a delay.
    pub fn add_after(self: Arc<Self>, key: PlacementName, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.add(key);
        });
    }

    /// Enqueue a key after its per-key exponential backoff with jitter.
    pub fn add_rate_limited(self: Arc<Self>, key: PlacementName) {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                return;
            }
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            let exp = (*failures).min(16);
            *failures += 1;
            let backoff = self
                .base_delay
                .saturating_mul(1u32 << exp)
                .min(self.max_delay);
            // Up to 10% jitter keeps a burst of failing placements from
            // synchronizing their retries.
            let jitter_ms = rand::rng().random_range(0..=backoff.as_millis() as u64 / 10);
            backoff + Duration::from_millis(jitter_ms)
        };
        self.add_after(key, delay);
    }

    /// Block until a key is available. Returns None once the queue has shut
    /// down and drained.
    pub async fn get(&self) -> Option<PlacementName> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.ready.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    if !inner.ready.is_empty() {
                        // Another key is still waiting; pass the wakeup on.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if inner.shut_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release a key a worker checked out. If the key was re-added while it
    /// was being processed, it goes back on the queue now.
    pub fn done(&self, key: &PlacementName) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.ready.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Clear the key's backoff history after a successful cycle, or when the
    /// key is dropped for good.
    pub fn forget(&self, key: &PlacementName) {
        self.inner.lock().unwrap().failures.remove(key);
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is waiting in the queue (checked-out keys excluded).
    pub fn is_queued(&self, key: &PlacementName) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.dirty.contains(key) && !inner.processing.contains(key)
    }

    /// Stop accepting keys and wake blocked getters; they drain what is
    /// ready and then observe shutdown.
    pub fn shut_down(&self) {
        self.inner.lock().unwrap().shut_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}
