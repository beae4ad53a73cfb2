use crate::{
    data_model::{ClusterScore, ClusterSchedulingPolicySnapshot, MemberCluster},
    scheduler::framework::{
        cycle_state::CycleState,
        plugin::{FilterPlugin, Plugin, PreFilterPlugin, ScorePlugin, Status},
    },
};

const PLUGIN_NAME: &str = "cluster-affinity";

/// Interprets the policy's cluster affinity terms: the required selector
/// gates admission at the Filter stage, the weighted preferred selectors
/// contribute the affinity dimension of the cluster score.
pub struct ClusterAffinity;

impl ClusterAffinity {
    fn affinity<'a>(
        policy: &'a ClusterSchedulingPolicySnapshot,
    ) -> Option<&'a crate::data_model::Affinity> {
        policy.policy.affinity.as_ref().filter(|a| !a.is_empty())
    }
}

impl Plugin for ClusterAffinity {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }
}

impl PreFilterPlugin for ClusterAffinity {
    fn pre_filter(&self, _state: &CycleState, policy: &ClusterSchedulingPolicySnapshot) -> Status {
        // A policy without affinity terms constrains nothing; opt the
        // filter out of this cycle entirely.
        if Self::affinity(policy).is_none() {
            return Status::skip(self.name());
        }
        Status::success(self.name())
    }
}

impl FilterPlugin for ClusterAffinity {
    fn filter(
        &self,
        _state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> Status {
        let Some(affinity) = Self::affinity(policy) else {
            return Status::success(self.name());
        };
        match &affinity.required {
            Some(selector) if !selector.matches(&cluster.labels) => Status::unschedulable(
                self.name(),
                format!(
                    "cluster {} does not match the required cluster affinity",
                    cluster.name
                ),
            ),
            _ => Status::success(self.name()),
        }
    }
}

impl ScorePlugin for ClusterAffinity {
    fn score(
        &self,
        _state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> (ClusterScore, Status) {
        let affinity_score = Self::affinity(policy)
            .map(|affinity| {
                affinity
                    .preferred
                    .iter()
                    .filter(|term| term.selector.matches(&cluster.labels))
                    .map(|term| term.weight)
                    .sum()
            })
            .unwrap_or(0);
        (
            ClusterScore {
                affinity_score,
                topology_spread_score: 0,
            },
            Status::success(self.name()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::data_model::{
        test_objects::tests::*, Affinity, LabelSelector, PreferredClusterSelector,
        SchedulingPolicy,
    };

    fn policy_with_affinity(affinity: Affinity) -> ClusterSchedulingPolicySnapshot {
        let mut policy: SchedulingPolicy = pick_n_policy(2);
        policy.affinity = Some(affinity);
        latest_snapshot(TEST_PLACEMENT, policy)
    }

    fn selector_for(key: &str, value: &str) -> LabelSelector {
        LabelSelector {
            match_labels: BTreeMap::from([(key.to_string(), value.to_string())]),
            match_expressions: vec![],
        }
    }

    #[test]
    fn no_affinity_terms_skips_the_filter() {
        let state = CycleState::new();
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        assert!(ClusterAffinity.pre_filter(&state, &snapshot).is_skip());

        let empty = policy_with_affinity(Affinity::default());
        assert!(ClusterAffinity.pre_filter(&state, &empty).is_skip());
    }

    #[test]
    fn required_selector_gates_clusters() {
        let state = CycleState::new();
        let snapshot = policy_with_affinity(Affinity {
            required: Some(selector_for("region", "east")),
            preferred: vec![],
        });
        assert!(ClusterAffinity.pre_filter(&state, &snapshot).is_success());

        let matching = ready_cluster_with_labels(
            "member-1",
            1_000,
            BTreeMap::from([("region".to_string(), "east".to_string())]),
        );
        assert!(ClusterAffinity
            .filter(&state, &snapshot, &matching)
            .is_success());

        let mismatched = ready_cluster("member-2", 1_000);
        let status = ClusterAffinity.filter(&state, &snapshot, &mismatched);
        assert!(status.is_cluster_unschedulable());
    }

    #[test]
    fn preferred_terms_accumulate_weight() {
        let state = CycleState::new();
        let snapshot = policy_with_affinity(Affinity {
            required: None,
            preferred: vec![
                PreferredClusterSelector {
                    weight: 10,
                    selector: selector_for("tier", "gold"),
                },
                PreferredClusterSelector {
                    weight: 3,
                    selector: selector_for("region", "east"),
                },
            ],
        });

        let cluster = ready_cluster_with_labels(
            "member-1",
            1_000,
            BTreeMap::from([
                ("tier".to_string(), "gold".to_string()),
                ("region".to_string(), "east".to_string()),
            ]),
        );
        let (score, status) = ClusterAffinity.score(&state, &snapshot, &cluster);
        assert!(status.is_success());
        assert_eq!(score.affinity_score, 13);

        let unlabeled = ready_cluster("member-2", 1_000);
        let (score, _) = ClusterAffinity.score(&state, &snapshot, &unlabeled);
        assert_eq!(score.affinity_score, 0);
    }
}
