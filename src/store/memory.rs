use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::{
    data_model::{
        is_valid_object_name, BindingState, ClusterName, ClusterResourceBinding,
        ClusterSchedulingPolicySnapshot, MemberCluster, PlacementName, PolicySnapshotStatus,
    },
    store::{ClusterEvent, ObjectStore, StoreError},
};

const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Objects {
    clusters: HashMap<ClusterName, MemberCluster>,
    snapshots: HashMap<String, ClusterSchedulingPolicySnapshot>,
    bindings: HashMap<String, ClusterResourceBinding>,
}

/// In-memory object store with resource-version optimistic concurrency and a
/// broadcast watch channel. Backs tests and dev mode; production deployments
/// put a real store behind the same trait.
pub struct InMemoryStore {
    objects: RwLock<Objects>,
    events_tx: broadcast::Sender<ClusterEvent>,
    binding_writes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(Objects::default()),
            events_tx,
            binding_writes: AtomicU64::new(0),
        }
    }

    /// Number of binding mutations accepted so far. Used to assert that
    /// re-applying a cycle's output produces no additional writes.
    pub fn binding_write_count(&self) -> u64 {
        self.binding_writes.load(Ordering::Relaxed)
    }

    fn emit(&self, event: ClusterEvent) {
        // Send fails only when nobody is subscribed.
        let _ = self.events_tx.send(event);
    }

    /// Create or update a cluster, emitting the corresponding watch event.
    pub async fn put_cluster(&self, mut cluster: MemberCluster) {
        let event = {
            let mut objects = self.objects.write().await;
            let event = match objects.clusters.get(&cluster.name) {
                Some(old) => {
                    cluster.resource_version = old.resource_version + 1;
                    ClusterEvent::Updated {
                        old: old.clone(),
                        new: cluster.clone(),
                    }
                }
                None => {
                    cluster.resource_version = 1;
                    ClusterEvent::Created(cluster.clone())
                }
            };
            objects.clusters.insert(cluster.name.clone(), cluster);
            event
        };
        self.emit(event);
    }

    pub async fn remove_cluster(&self, name: &ClusterName) {
        let removed = {
            let mut objects = self.objects.write().await;
            objects.clusters.remove(name)
        };
        if let Some(old) = removed {
            self.emit(ClusterEvent::Deleted(old));
        }
    }

    /// Store a policy snapshot. A snapshot flagged latest demotes any other
    /// latest snapshot of the same placement.
    pub async fn put_policy_snapshot(&self, mut snapshot: ClusterSchedulingPolicySnapshot) {
        let mut objects = self.objects.write().await;
        if snapshot.is_latest {
            for other in objects.snapshots.values_mut() {
                if other.placement == snapshot.placement && other.name != snapshot.name {
                    other.is_latest = false;
                }
            }
        }
        snapshot.resource_version += 1;
        objects.snapshots.insert(snapshot.name.clone(), snapshot);
    }

    /// Seed a binding directly, bypassing create semantics. Test setup only.
    pub async fn put_binding(&self, binding: ClusterResourceBinding) {
        let mut objects = self.objects.write().await;
        objects.bindings.insert(binding.name.clone(), binding);
    }

    pub async fn get_binding(&self, name: &str) -> Option<ClusterResourceBinding> {
        self.objects.read().await.bindings.get(name).cloned()
    }

    pub async fn list_all_bindings(&self) -> Vec<ClusterResourceBinding> {
        self.objects.read().await.bindings.values().cloned().collect()
    }

    pub async fn get_policy_snapshot(&self, name: &str) -> Option<ClusterSchedulingPolicySnapshot> {
        self.objects.read().await.snapshots.get(name).cloned()
    }

    /// Flip a binding to a new state out-of-band, standing in for the
    /// dispatcher. Test setup only.
    pub async fn set_binding_state(&self, name: &str, state: BindingState) {
        let mut objects = self.objects.write().await;
        if let Some(binding) = objects.bindings.get_mut(name) {
            binding.state = state;
            binding.resource_version += 1;
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_clusters(&self) -> Result<Vec<MemberCluster>, StoreError> {
        let objects = self.objects.read().await;
        let mut clusters: Vec<_> = objects
            .clusters
            .values()
            .filter(|c| is_valid_object_name(c.name.get()))
            .cloned()
            .collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clusters)
    }

    async fn list_bindings_for(
        &self,
        placement: &PlacementName,
    ) -> Result<Vec<ClusterResourceBinding>, StoreError> {
        let objects = self.objects.read().await;
        let mut bindings: Vec<_> = objects
            .bindings
            .values()
            .filter(|b| &b.placement == placement)
            .cloned()
            .collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bindings)
    }

    async fn list_bindings_targeting(
        &self,
        cluster: &ClusterName,
    ) -> Result<Vec<ClusterResourceBinding>, StoreError> {
        let objects = self.objects.read().await;
        let mut bindings: Vec<_> = objects
            .bindings
            .values()
            .filter(|b| &b.target_cluster == cluster)
            .cloned()
            .collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bindings)
    }

    async fn latest_policy_snapshot(
        &self,
        placement: &PlacementName,
    ) -> Result<Option<ClusterSchedulingPolicySnapshot>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .snapshots
            .values()
            .find(|s| &s.placement == placement && s.is_latest)
            .cloned())
    }

    async fn list_latest_policy_snapshots(
        &self,
    ) -> Result<Vec<ClusterSchedulingPolicySnapshot>, StoreError> {
        let objects = self.objects.read().await;
        let mut snapshots: Vec<_> = objects
            .snapshots
            .values()
            .filter(|s| s.is_latest)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }

    async fn list_placements(&self) -> Result<Vec<PlacementName>, StoreError> {
        let objects = self.objects.read().await;
        let mut placements: Vec<_> = objects
            .snapshots
            .values()
            .map(|s| s.placement.clone())
            .collect();
        placements.sort();
        placements.dedup();
        Ok(placements)
    }

    async fn create_binding(&self, mut binding: ClusterResourceBinding) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        if objects.bindings.contains_key(&binding.name) {
            return Err(StoreError::AlreadyExists {
                kind: "binding",
                name: binding.name,
            });
        }
        binding.resource_version = 1;
        self.binding_writes.fetch_add(1, Ordering::Relaxed);
        objects.bindings.insert(binding.name.clone(), binding);
        Ok(())
    }

    async fn update_binding(
        &self,
        mut binding: ClusterResourceBinding,
    ) -> Result<ClusterResourceBinding, StoreError> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .bindings
            .get(&binding.name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "binding",
                name: binding.name.clone(),
            })?;
        if stored.resource_version != binding.resource_version {
            return Err(StoreError::Conflict {
                kind: "binding",
                name: binding.name,
            });
        }
        binding.resource_version += 1;
        self.binding_writes.fetch_add(1, Ordering::Relaxed);
        objects.bindings.insert(binding.name.clone(), binding.clone());
        Ok(binding)
    }

    async fn update_policy_snapshot_status(
        &self,
        snapshot_name: &str,
        status: PolicySnapshotStatus,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let snapshot =
            objects
                .snapshots
                .get_mut(snapshot_name)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "policy snapshot",
                    name: snapshot_name.to_string(),
                })?;
        snapshot.status = status;
        snapshot.resource_version += 1;
        Ok(())
    }

    fn watch_clusters(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events_tx.subscribe()
    }
}
