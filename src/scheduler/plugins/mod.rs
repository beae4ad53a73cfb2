pub mod cluster_affinity;
pub mod cluster_eligibility;
pub mod taint_toleration;

use std::sync::Arc;

use crate::scheduler::framework::plugin::{Handle, Profile};

/// The profile a scheduler instance runs unless configured otherwise:
/// eligibility and taint filtering for every policy, affinity filtering and
/// scoring when the policy declares affinity terms.
pub fn default_profile(handle: &Handle) -> Profile {
    let eligibility = Arc::new(cluster_eligibility::ClusterEligibility::new(handle));
    let affinity = Arc::new(cluster_affinity::ClusterAffinity);
    let tolerations = Arc::new(taint_toleration::TaintToleration);

    Profile::new("default")
        .with_filter_plugin(eligibility)
        .with_pre_filter_plugin(affinity.clone())
        .with_filter_plugin(affinity.clone())
        .with_score_plugin(affinity)
        .with_filter_plugin(tolerations)
}
