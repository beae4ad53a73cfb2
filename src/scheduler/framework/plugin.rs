use std::{fmt, sync::Arc, time::Duration};

use crate::{
    data_model::{ClusterScore, ClusterSchedulingPolicySnapshot, MemberCluster},
    scheduler::framework::cycle_state::CycleState,
    store::ObjectStore,
};

/// Outcome kinds a plugin may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StatusKind {
    Success,
    /// A pre-filter plugin opting out of the Filter stage for this cycle.
    Skip,
    /// A filter verdict, not an error: the cluster cannot host the placement.
    ClusterUnschedulable,
    /// A plugin failure; aborts the scheduling cycle.
    InternalError,
}

/// Outcome of one plugin call, carrying the originating plugin and a
/// human-readable reason.
#[derive(Debug, Clone)]
pub struct Status {
    kind: StatusKind,
    plugin: String,
    reason: String,
}

impl Status {
    pub fn success(plugin: &str) -> Self {
        Self {
            kind: StatusKind::Success,
            plugin: plugin.to_string(),
            reason: String::new(),
        }
    }

    pub fn skip(plugin: &str) -> Self {
        Self {
            kind: StatusKind::Skip,
            plugin: plugin.to_string(),
            reason: String::new(),
        }
    }

    pub fn unschedulable(plugin: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::ClusterUnschedulable,
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }

    pub fn internal_error(plugin: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::InternalError,
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap an arbitrary error as an internal-error status.
    pub fn from_error(plugin: &str, err: &dyn std::error::Error) -> Self {
        Self::internal_error(plugin, err.to_string())
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_success(&self) -> bool {
        self.kind == StatusKind::Success
    }

    pub fn is_skip(&self) -> bool {
        self.kind == StatusKind::Skip
    }

    pub fn is_cluster_unschedulable(&self) -> bool {
        self.kind == StatusKind::ClusterUnschedulable
    }

    pub fn is_internal_error(&self) -> bool {
        self.kind == StatusKind::InternalError
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (plugin {}): {}", self.kind, self.plugin, self.reason)
    }
}

/// Shared structs a plugin may hold on to: the store client and the
/// framework's eligibility configuration. Handed to plugins at registration
/// as an immutable value, so no back-pointer to the framework exists.
#[derive(Clone)]
pub struct Handle {
    pub store: Arc<dyn ObjectStore>,
    pub heartbeat_freshness_window: Duration,
}

pub trait Plugin: Send + Sync {
    /// Name of the plugin, unique within a profile.
    fn name(&self) -> &'static str;
}

/// Runs once per cycle before the Filter stage. May seed cycle state for
/// later extension points, or return Skip to opt its filter out entirely.
pub trait PreFilterPlugin: Plugin {
    fn pre_filter(&self, state: &CycleState, policy: &ClusterSchedulingPolicySnapshot) -> Status;
}

/// Decides whether one cluster can host the placement. Runs in parallel
/// across clusters; implementations must be pure with respect to external
/// state and touch cycle state only through its guarded accessors.
pub trait FilterPlugin: Plugin {
    fn filter(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> Status;
}

/// Runs once per cycle before the Score stage (PickN policies only).
pub trait PreScorePlugin: Plugin {
    fn pre_score(&self, state: &CycleState, policy: &ClusterSchedulingPolicySnapshot) -> Status;
}

/// Scores one cluster that survived filtering (PickN policies only). Scores
/// from all plugins compose by summing per dimension.
pub trait ScorePlugin: Plugin {
    fn score(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
        cluster: &MemberCluster,
    ) -> (ClusterScore, Status);
}

/// Caps how many clusters a PickN cycle scores in one batch. Skip means no
/// opinion; the smallest limit across plugins wins.
pub trait PostBatchPlugin: Plugin {
    fn post_batch(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> (usize, Status);
}

/// Immutable registry of the plugins a scheduler instance runs, grouped by
/// extension point. A single plugin instance may register at several points.
pub struct Profile {
    name: String,
    pub(crate) pre_filter_plugins: Vec<Arc<dyn PreFilterPlugin>>,
    pub(crate) filter_plugins: Vec<Arc<dyn FilterPlugin>>,
    pub(crate) pre_score_plugins: Vec<Arc<dyn PreScorePlugin>>,
    pub(crate) score_plugins: Vec<Arc<dyn ScorePlugin>>,
    pub(crate) post_batch_plugins: Vec<Arc<dyn PostBatchPlugin>>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_filter_plugins: Vec::new(),
            filter_plugins: Vec::new(),
            pre_score_plugins: Vec::new(),
            score_plugins: Vec::new(),
            post_batch_plugins: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_pre_filter_plugin(mut self, plugin: Arc<dyn PreFilterPlugin>) -> Self {
        self.pre_filter_plugins.push(plugin);
        self
    }

    pub fn with_filter_plugin(mut self, plugin: Arc<dyn FilterPlugin>) -> Self {
        self.filter_plugins.push(plugin);
        self
    }

    pub fn with_pre_score_plugin(mut self, plugin: Arc<dyn PreScorePlugin>) -> Self {
        self.pre_score_plugins.push(plugin);
        self
    }

    pub fn with_score_plugin(mut self, plugin: Arc<dyn ScorePlugin>) -> Self {
        self.score_plugins.push(plugin);
        self
    }

    pub fn with_post_batch_plugin(mut self, plugin: Arc<dyn PostBatchPlugin>) -> Self {
        self.post_batch_plugins.push(plugin);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::test_objects::tests::*;

    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    impl PreFilterPlugin for NoopPlugin {
        fn pre_filter(
            &self,
            _state: &CycleState,
            _policy: &ClusterSchedulingPolicySnapshot,
        ) -> Status {
            Status::success(self.name())
        }
    }

    impl FilterPlugin for NoopPlugin {
        fn filter(
            &self,
            _state: &CycleState,
            _policy: &ClusterSchedulingPolicySnapshot,
            _cluster: &MemberCluster,
        ) -> Status {
            Status::success(self.name())
        }
    }

    #[test]
    fn status_kind_predicates() {
        assert!(Status::success("p").is_success());
        assert!(Status::skip("p").is_skip());
        assert!(Status::unschedulable("p", "taint not tolerated").is_cluster_unschedulable());
        assert!(Status::internal_error("p", "boom").is_internal_error());
    }

    #[test]
    fn from_error_is_internal() {
        let err = std::io::Error::other("store unreachable");
        let status = Status::from_error("p", &err);
        assert!(status.is_internal_error());
        assert_eq!(status.reason(), "store unreachable");
        assert_eq!(status.plugin(), "p");
    }

    #[test]
    fn one_instance_may_register_at_multiple_points() {
        let plugin = Arc::new(NoopPlugin);
        let profile = Profile::new("test")
            .with_pre_filter_plugin(plugin.clone())
            .with_filter_plugin(plugin.clone());
        assert_eq!(profile.pre_filter_plugins.len(), 1);
        assert_eq!(profile.filter_plugins.len(), 1);

        let state = CycleState::new();
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        assert!(profile.pre_filter_plugins[0]
            .pre_filter(&state, &snapshot)
            .is_success());
    }
}
