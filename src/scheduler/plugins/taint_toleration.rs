use crate::{
    data_model::{ClusterSchedulingPolicySnapshot, MemberCluster, Taint},
    scheduler::framework::{
        cycle_state::CycleState,
        plugin::{FilterPlugin, Plugin, Status},
    },
};

const PLUGIN_NAME: &str = "taint-toleration";

/// Rejects clusters carrying a taint the policy does not tolerate.
pub struct TaintToleration;

fn untolerated<'a>(
    policy: &ClusterSchedulingPolicySnapshot,
    cluster: &'a MemberCluster,
) -> Option<&'a Taint> {
    cluster.taints.iter().find(|taint| {
        !policy
            .policy
            .tolerations
            .iter()
            .any(|toleration| toleration.tolerates(taint))
    })
}

impl Plugin for TaintToleration {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }
}

impl FilterPlugin for TaintToleration {
    fn filter(
        &self,
        _state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> Status {
        match untolerated(policy, cluster) {
            Some(taint) => Status::unschedulable(
                self.name(),
                format!(
                    "cluster {} has an untolerated taint {}={}:{}",
                    cluster.name, taint.key, taint.value, taint.effect
                ),
            ),
            None => Status::success(self.name()),
        }
    }
}
