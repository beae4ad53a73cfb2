use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    data_model::{BindingState, ClusterState, MemberCluster},
    scheduler::queue::WorkQueue,
    store::{ClusterEvent, ObjectStore, StoreError},
    utils::get_epoch_time_in_ms,
};

/// Breadth of the re-queue a cluster transition calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnqueueDecision {
    /// The transition cannot change any cycle's output.
    None,
    /// Placements whose selector could match the cluster: everything with an
    /// active policy snapshot. Proving a selector mismatch here would
    /// duplicate plugin logic, and cycles are idempotent, so the candidate
    /// set is conservative.
    Candidates,
    /// Only placements holding a live binding targeting the cluster.
    Referrers,
    /// Every known placement: bindings referencing the cluster will be
    /// neutralized, and a full enqueue is safe and simpler than proving
    /// which placements are unaffected.
    AllPlacements,
}

/// Watches member cluster lifecycle transitions and re-queues the placements
/// whose scheduling outcome the transition could change. Stateless: each
/// decision is computed from the (old, new) snapshot pair alone, so
/// at-least-once delivery is harmless.
pub struct ClusterWatcher {
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue>,
    heartbeat_freshness_window: Duration,
}

impl ClusterWatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<WorkQueue>,
        heartbeat_freshness_window: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            heartbeat_freshness_window,
        }
    }

    /// Consume the store's cluster watch stream until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut events = self.store.watch_clusters();
        info!("cluster watcher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("cluster watcher shutting down");
                    return;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(err) = self.handle_event(event).await {
                            // Store reads failed; the next event for this
                            // cluster retries the lookup.
                            error!(error = %err, "failed to handle cluster event");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "cluster watch lagged; continuing");
                    }
                    Err(RecvError::Closed) => {
                        info!("cluster watch stream closed");
                        return;
                    }
                },
            }
        }
    }

    pub async fn handle_event(&self, event: ClusterEvent) -> Result<(), StoreError> {
        let (old, new) = match &event {
            ClusterEvent::Created(cluster) => (None, Some(cluster)),
            ClusterEvent::Updated { old, new } => (Some(old), Some(new)),
            ClusterEvent::Deleted(cluster) => (Some(cluster), None),
        };
        let cluster = new.or(old).expect("a cluster event names a cluster");

        let decision = self.decide(old, new);
        debug!(
            cluster = cluster.name.get(),
            decision = ?decision,
            "observed cluster transition"
        );
        match decision {
            EnqueueDecision::None => Ok(()),
            EnqueueDecision::Candidates => self.enqueue_candidates().await,
            EnqueueDecision::Referrers => self.enqueue_referrers(cluster).await,
            EnqueueDecision::AllPlacements => self.enqueue_all_placements().await,
        }
    }

    fn decide(&self, old: Option<&MemberCluster>, new: Option<&MemberCluster>) -> EnqueueDecision {
        let now_ms = get_epoch_time_in_ms();
        let was_eligible = old
            .map(|c| c.is_eligible(now_ms, self.heartbeat_freshness_window))
            .unwrap_or(false);
        let is_eligible = new
            .map(|c| c.is_eligible(now_ms, self.heartbeat_freshness_window))
            .unwrap_or(false);

        match (was_eligible, is_eligible) {
            // An ineligible cluster changing in place cannot alter any
            // placement's outcome; it will be revisited when it turns
            // eligible.
            (false, false) => EnqueueDecision::None,
            (false, true) => EnqueueDecision::Candidates,
            (true, true) => {
                let labels_changed = match (old, new) {
                    (Some(old), Some(new)) => old.labels != new.labels,
                    _ => true,
                };
                if labels_changed {
                    EnqueueDecision::Candidates
                } else {
                    EnqueueDecision::None
                }
            }
            (true, false) => {
                // A spec-level departure invalidates the cluster for every
                // placement; a status-level degradation (stale heartbeat,
                // unhealthy agent) only matters to placements that already
                // hold a binding on the cluster.
                let departed = match new {
                    None => true,
                    Some(cluster) => cluster.state == ClusterState::Leave,
                };
                if departed {
                    EnqueueDecision::AllPlacements
                } else {
                    EnqueueDecision::Referrers
                }
            }
        }
    }

    async fn enqueue_candidates(&self) -> Result<(), StoreError> {
        for snapshot in self.store.list_latest_policy_snapshots().await? {
            self.queue.add(snapshot.placement);
        }
        Ok(())
    }

    async fn enqueue_referrers(&self, cluster: &MemberCluster) -> Result<(), StoreError> {
        for binding in self.store.list_bindings_targeting(&cluster.name).await? {
            if binding.state != BindingState::Unscheduled {
                self.queue.add(binding.placement);
            }
        }
        Ok(())
    }

    async fn enqueue_all_placements(&self) -> Result<(), StoreError> {
        for placement in self.store.list_placements().await? {
            self.queue.add(placement);
        }
        Ok(())
    }
}
