use std::time::Duration;

use crate::{
    data_model::{ClusterSchedulingPolicySnapshot, MemberCluster},
    scheduler::framework::{
        cycle_state::CycleState,
        plugin::{FilterPlugin, Handle, Plugin, Status},
    },
    utils::get_epoch_time_in_ms,
};

const PLUGIN_NAME: &str = "cluster-eligibility";

/// Rejects clusters that are not in a normally operating state: intent to
/// leave, member agent missing or unhealthy, or heartbeat outside the
/// freshness window.
pub struct ClusterEligibility {
    heartbeat_freshness_window: Duration,
}

impl ClusterEligibility {
    pub fn new(handle: &Handle) -> Self {
        Self {
            heartbeat_freshness_window: handle.heartbeat_freshness_window,
        }
    }
}

impl Plugin for ClusterEligibility {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }
}

impl FilterPlugin for ClusterEligibility {
    fn filter(
        &self,
        state: &CycleState,
        _policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> Status {
        // Freshness is judged against the cycle's single wall-clock sample
        // so that every cluster in the cycle sees the same instant.
        let now_ms = state.cycle_start_ms().unwrap_or_else(get_epoch_time_in_ms);
        if cluster.is_eligible(now_ms, self.heartbeat_freshness_window) {
            Status::success(self.name())
        } else {
            Status::unschedulable(
                self.name(),
                format!("cluster {} is not eligible for placement", cluster.name),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        data_model::test_objects::tests::*,
        scheduler::framework::cycle_state::STATE_KEY_CYCLE_START_MS,
        store::memory::InMemoryStore,
    };

    fn plugin() -> ClusterEligibility {
        let handle = Handle {
            store: Arc::new(InMemoryStore::new()),
            heartbeat_freshness_window: Duration::from_secs(300),
        };
        ClusterEligibility::new(&handle)
    }

    fn state_at(now_ms: u64) -> CycleState {
        let state = CycleState::new();
        state.write(STATE_KEY_CYCLE_START_MS, Arc::new(now_ms));
        state
    }

    #[test]
    fn ready_cluster_passes() {
        let now = 10_000_000;
        let status = plugin().filter(
            &state_at(now),
            &latest_snapshot(TEST_PLACEMENT, pick_all_policy()),
            &ready_cluster("member-1", now),
        );
        assert!(status.is_success());
    }

    #[test]
    fn left_cluster_is_unschedulable() {
        let status = plugin().filter(
            &state_at(10_000_000),
            &latest_snapshot(TEST_PLACEMENT, pick_all_policy()),
            &left_cluster("member-1"),
        );
        assert!(status.is_cluster_unschedulable());
        assert!(status.reason().contains("member-1"));
    }

    #[test]
    fn stale_heartbeat_is_unschedulable() {
        let now = 10_000_000;
        let status = plugin().filter(
            &state_at(now),
            &latest_snapshot(TEST_PLACEMENT, pick_all_policy()),
            &ready_cluster("member-1", now - 301_000),
        );
        assert!(status.is_cluster_unschedulable());
    }
}
