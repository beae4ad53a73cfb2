pub mod framework;
pub mod plugins;
pub mod queue;
pub mod watcher;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    data_model::PlacementName,
    metrics::SchedulerMetrics,
    scheduler::{framework::Framework, queue::WorkQueue},
    store::{ObjectStore, StoreError},
};

/// Errors a scheduling cycle can surface, classified by what the controller
/// does next: retryable failures requeue the placement with backoff,
/// unexpected behavior drops the key and is surfaced to operators.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An invariant violation, e.g. a plugin returning a status kind its
    /// extension point must not produce. Not retryable.
    #[error("unexpected scheduler behavior: {0}")]
    UnexpectedBehavior(String),

    /// The cycle was aborted by shutdown; the key is requeued so the next
    /// leader picks it up.
    #[error("scheduling cycle cancelled")]
    Cancelled,
}

impl SchedulerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Store(err) => err.is_retryable(),
            SchedulerError::UnexpectedBehavior(_) => false,
            SchedulerError::Cancelled => true,
        }
    }
}

/// The controller glue: worker tasks that drain the placement-key queue,
/// resolve each key to its active policy snapshot, and hand the pair to the
/// scheduling framework.
pub struct Scheduler {
    store: Arc<dyn ObjectStore>,
    framework: Arc<Framework>,
    queue: Arc<WorkQueue>,
    worker_count: usize,
    metrics: Arc<SchedulerMetrics>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        framework: Arc<Framework>,
        queue: Arc<WorkQueue>,
        worker_count: usize,
    ) -> Self {
        Self {
            store,
            framework,
            queue,
            worker_count: worker_count.max(1),
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    /// Spawn the worker tasks. Workers exit when the token is cancelled or
    /// the queue shuts down.
    pub fn start(self: &Arc<Self>, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.worker_count)
            .map(|worker| {
                let scheduler = self.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    info!(worker, "scheduler worker started");
                    loop {
                        let key = tokio::select! {
                            _ = token.cancelled() => break,
                            key = scheduler.queue.get() => match key {
                                Some(key) => key,
                                None => break,
                            },
                        };
                        scheduler.process(&token, key).await;
                    }
                    info!(worker, "scheduler worker stopped");
                })
            })
            .collect()
    }

    /// Handle one checked-out placement key end to end.
    async fn process(&self, token: &CancellationToken, key: PlacementName) {
        let snapshot = match self.store.latest_policy_snapshot(&key).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_retryable() => {
                warn!(placement = key.get(), error = %err, "failed to load policy snapshot; requeueing");
                self.queue.clone().add_rate_limited(key.clone());
                self.queue.done(&key);
                return;
            }
            Err(err) => {
                error!(placement = key.get(), error = %err, "failed to load policy snapshot; dropping key");
                self.queue.forget(&key);
                self.queue.done(&key);
                return;
            }
        };

        let Some(snapshot) = snapshot else {
            // No active policy for the placement; nothing to schedule until
            // a snapshot shows up, which re-enqueues the key.
            self.queue.forget(&key);
            self.queue.done(&key);
            return;
        };

        match self
            .framework
            .run_scheduling_cycle(token, &key, &snapshot)
            .await
        {
            Ok(requeue_after) => {
                self.queue.forget(&key);
                if let Some(delay) = requeue_after {
                    self.queue.clone().add_after(key.clone(), delay);
                }
            }
            Err(err) if err.is_retryable() => {
                warn!(placement = key.get(), error = %err, "scheduling cycle failed; requeueing");
                self.metrics.cycle_retries.add(1, &[]);
                self.queue.clone().add_rate_limited(key.clone());
            }
            Err(err) => {
                // UnexpectedBehavior: surface it and drop the key rather
                // than retrying a cycle that cannot succeed.
                error!(placement = key.get(), error = %err, "scheduling cycle failed fatally; dropping key");
                self.metrics.cycle_failures.add(1, &[]);
                self.queue.forget(&key);
            }
        }
        self.queue.done(&key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        data_model::{test_objects::tests::*, BindingState},
        scheduler::{
            framework::{plugin::Handle, FrameworkOptions},
            plugins::default_profile,
        },
        store::memory::InMemoryStore,
        utils::get_epoch_time_in_ms,
    };

    fn build_scheduler(store: Arc<InMemoryStore>) -> Arc<Scheduler> {
        let options = FrameworkOptions::default();
        let handle = Handle {
            store: store.clone(),
            heartbeat_freshness_window: options.heartbeat_freshness_window,
        };
        let framework = Arc::new(Framework::new(
            default_profile(&handle),
            store.clone(),
            options,
        ));
        let queue = Arc::new(WorkQueue::default());
        Arc::new(Scheduler::new(store, framework, queue, 2))
    }

    #[tokio::test]
    async fn worker_drains_key_and_writes_bindings() {
        let store = Arc::new(InMemoryStore::new());
        let now = get_epoch_time_in_ms();
        store.put_cluster(ready_cluster("member-1", now)).await;
        store
            .put_policy_snapshot(latest_snapshot(TEST_PLACEMENT, pick_all_policy()))
            .await;

        let scheduler = build_scheduler(store.clone());
        let token = CancellationToken::new();
        let workers = scheduler.start(&token);

        scheduler.queue.add(TEST_PLACEMENT.into());

        // Wait for the cycle to land.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let bindings = store
                .list_bindings_for(&TEST_PLACEMENT.into())
                .await
                .unwrap();
            if !bindings.is_empty() {
                assert_eq!(bindings[0].state, BindingState::Scheduled);
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cycle did not complete in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        scheduler.queue.shut_down();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn key_without_policy_snapshot_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = build_scheduler(store.clone());
        let token = CancellationToken::new();

        scheduler.queue.add("crp-unknown".into());
        let key = scheduler.queue.get().await.unwrap();
        scheduler.process(&token, key).await;

        assert!(scheduler.queue.is_empty());
    }

    #[tokio::test]
    async fn fatal_cycle_error_drops_the_key() {
        let store = Arc::new(InMemoryStore::new());
        let now = get_epoch_time_in_ms();
        store.put_cluster(ready_cluster("member-1", now)).await;
        // A PickN snapshot with no cluster count trips UnexpectedBehavior.
        let mut policy = pick_n_policy(1);
        policy.cluster_count = None;
        store
            .put_policy_snapshot(latest_snapshot(TEST_PLACEMENT, policy))
            .await;

        let scheduler = build_scheduler(store.clone());
        let token = CancellationToken::new();

        scheduler.queue.add(TEST_PLACEMENT.into());
        let key = scheduler.queue.get().await.unwrap();
        scheduler.process(&token, key).await;

        // The key was not requeued.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.queue.is_empty());
    }
}
