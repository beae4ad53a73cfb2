use std::{collections::HashMap, time::Duration};

use crate::{
    data_model::{
        new_binding_name, BindingState, ClusterDecision, ClusterName, ClusterResourceBinding,
        ClusterSchedulingPolicySnapshot, MemberCluster, ScoredCluster,
    },
    scheduler::framework::PICKED_BY_POLICY_REASON,
};

/// Existing bindings of a placement, partitioned by how the current cycle
/// must treat them. The four sets are pairwise disjoint; bindings already
/// Unscheduled and bindings whose target cluster object is gone are dropped.
#[derive(Debug, Default)]
pub struct ClassifiedBindings {
    /// Live, cleared by the dispatcher, produced by the current snapshot.
    pub bound: Vec<ClusterResourceBinding>,
    /// Live, awaiting the dispatcher, produced by the current snapshot.
    pub scheduled: Vec<ClusterResourceBinding>,
    /// Live, but produced by an out-of-date policy snapshot.
    pub obsolete: Vec<ClusterResourceBinding>,
    /// Live, but the target cluster is no longer eligible.
    pub dangling: Vec<ClusterResourceBinding>,
}

/// Partition a placement's bindings against the active policy snapshot and
/// the observed cluster population. Cluster liveness takes precedence over
/// policy freshness: a binding that is both stale and targeting an
/// ineligible cluster is dangling.
pub fn classify_bindings(
    policy: &ClusterSchedulingPolicySnapshot,
    bindings: Vec<ClusterResourceBinding>,
    clusters: &HashMap<ClusterName, MemberCluster>,
    now_ms: u64,
    freshness_window: Duration,
) -> ClassifiedBindings {
    let mut classified = ClassifiedBindings::default();
    for binding in bindings {
        if binding.state == BindingState::Unscheduled {
            continue;
        }
        let Some(cluster) = clusters.get(&binding.target_cluster) else {
            // The target cluster object is gone; the binding is orphaned and
            // of no interest to this cycle.
            continue;
        };
        if !cluster.is_eligible(now_ms, freshness_window) {
            classified.dangling.push(binding);
        } else if binding.policy_snapshot_name != policy.name {
            classified.obsolete.push(binding);
        } else if binding.state == BindingState::Bound {
            classified.bound.push(binding);
        } else {
            classified.scheduled.push(binding);
        }
    }
    classified
}

/// Binding mutations a cycle must apply, in application order: creates
/// first, then updates, then mark-unscheduled.
#[derive(Debug, Default)]
pub struct BindingOps {
    pub to_create: Vec<ClusterResourceBinding>,
    pub to_update: Vec<ClusterResourceBinding>,
    pub to_unschedule: Vec<ClusterResourceBinding>,
}

fn picked_decision(cluster: &ClusterName, scored: &ScoredCluster) -> ClusterDecision {
    ClusterDecision {
        cluster_name: cluster.clone(),
        selected: true,
        score: Some(scored.score),
        reason: PICKED_BY_POLICY_REASON.to_string(),
    }
}

/// Cross-reference the freshly picked clusters with the placement's live
/// bindings:
///
/// * a picked cluster without a live binding gets a new Scheduled binding
///   referencing the current snapshot and carrying its score;
/// * a picked cluster whose binding references an older snapshot, or whose
///   recorded score changed, has that binding refreshed (state untouched);
/// * every live binding whose target was not picked again is marked for
///   unscheduling.
pub fn cross_reference(
    policy: &ClusterSchedulingPolicySnapshot,
    picked: &[ScoredCluster],
    classified: &ClassifiedBindings,
) -> BindingOps {
    let mut live: HashMap<&ClusterName, &ClusterResourceBinding> = HashMap::new();
    for binding in classified
        .bound
        .iter()
        .chain(classified.scheduled.iter())
        .chain(classified.obsolete.iter())
    {
        live.insert(&binding.target_cluster, binding);
    }

    let mut ops = BindingOps::default();
    for scored in picked {
        match live.remove(&scored.cluster) {
            None => {
                ops.to_create.push(ClusterResourceBinding {
                    name: new_binding_name(&policy.placement, &scored.cluster),
                    placement: policy.placement.clone(),
                    target_cluster: scored.cluster.clone(),
                    state: BindingState::Scheduled,
                    policy_snapshot_name: policy.name.clone(),
                    cluster_decision: Some(picked_decision(&scored.cluster, scored)),
                    resource_version: 0,
                });
            }
            Some(existing) => {
                let score_changed = existing
                    .cluster_decision
                    .as_ref()
                    .and_then(|d| d.score)
                    != Some(scored.score);
                if existing.policy_snapshot_name != policy.name || score_changed {
                    let mut refreshed = existing.clone();
                    refreshed.policy_snapshot_name = policy.name.clone();
                    refreshed.cluster_decision = Some(picked_decision(&scored.cluster, scored));
                    ops.to_update.push(refreshed);
                }
            }
        }
    }

    // Whatever remains was not picked this cycle.
    ops.to_unschedule
        .extend(live.into_values().cloned());
    ops.to_unschedule.sort_by(|a, b| a.name.cmp(&b.name));
    ops
}
