pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::data_model::{
    ClusterName, ClusterResourceBinding, ClusterSchedulingPolicySnapshot, MemberCluster,
    PlacementName, PolicySnapshotStatus,
};

/// Failure taxonomy for object store access. Transient failures and write
/// conflicts are retryable; the scheduling cycle that hit one is requeued
/// with backoff.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("conflict updating {kind} {name}: resource version is stale")]
    Conflict { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Conflict { .. })
    }
}

/// A change to a member cluster, delivered at least once and in per-object
/// order.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Created(MemberCluster),
    Updated {
        old: MemberCluster,
        new: MemberCluster,
    },
    Deleted(MemberCluster),
}

/// Typed facade over the external object store.
///
/// Reads come in two flavors: cached reads are eventually consistent and
/// cheap; direct reads go to the backing store and are read-after-write
/// consistent. Bindings are always listed directly so that a cycle running
/// right after a previous cycle's writes does not over-schedule.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All member clusters, from cache. Objects with invalid names are
    /// treated as absent.
    async fn list_clusters(&self) -> Result<Vec<MemberCluster>, StoreError>;

    /// Bindings owned by a placement, read directly from the backing store.
    async fn list_bindings_for(
        &self,
        placement: &PlacementName,
    ) -> Result<Vec<ClusterResourceBinding>, StoreError>;

    /// Bindings whose target is the given cluster, from cache.
    async fn list_bindings_targeting(
        &self,
        cluster: &ClusterName,
    ) -> Result<Vec<ClusterResourceBinding>, StoreError>;

    /// The active policy snapshot for a placement, if one exists.
    async fn latest_policy_snapshot(
        &self,
        placement: &PlacementName,
    ) -> Result<Option<ClusterSchedulingPolicySnapshot>, StoreError>;

    /// The active policy snapshot of every placement that has one.
    async fn list_latest_policy_snapshots(
        &self,
    ) -> Result<Vec<ClusterSchedulingPolicySnapshot>, StoreError>;

    /// Every placement known to the store, active or not.
    async fn list_placements(&self) -> Result<Vec<PlacementName>, StoreError>;

    async fn create_binding(&self, binding: ClusterResourceBinding) -> Result<(), StoreError>;

    /// Optimistic update keyed on the binding's resource version. Returns
    /// the stored copy carrying the advanced version.
    async fn update_binding(
        &self,
        binding: ClusterResourceBinding,
    ) -> Result<ClusterResourceBinding, StoreError>;

    async fn update_policy_snapshot_status(
        &self,
        snapshot_name: &str,
        status: PolicySnapshotStatus,
    ) -> Result<(), StoreError>;

    /// Subscribe to cluster change notifications.
    fn watch_clusters(&self) -> broadcast::Receiver<ClusterEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StoreError::Transient("connection reset".to_string()).is_retryable());
        assert!(StoreError::Conflict {
            kind: "binding",
            name: "b-1".to_string()
        }
        .is_retryable());
        assert!(!StoreError::AlreadyExists {
            kind: "binding",
            name: "b-1".to_string()
        }
        .is_retryable());
        assert!(!StoreError::NotFound {
            kind: "cluster",
            name: "member-1".to_string()
        }
        .is_retryable());
    }
}
