pub mod classifier;
pub mod cycle_state;
pub mod parallelizer;
pub mod plugin;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    data_model::{
        BindingState, ClusterDecision, ClusterResourceBinding, ClusterSchedulingPolicySnapshot,
        ClusterScore, MemberCluster, PlacementName, PlacementType, PolicySnapshotStatus,
        ScoredCluster,
    },
    metrics::{SchedulerMetrics, Timer},
    scheduler::{
        framework::{
            classifier::{classify_bindings, cross_reference, BindingOps, ClassifiedBindings},
            cycle_state::{CycleState, STATE_KEY_CYCLE_START_MS},
            parallelizer::{ErrorFlag, Parallelizer, DEFAULT_NUM_WORKERS},
            plugin::{Profile, Status, StatusKind},
        },
        SchedulerError,
    },
    store::ObjectStore,
    utils::get_epoch_time_in_ms,
};

/// Reason recorded on decisions for clusters picked by the policy.
pub const PICKED_BY_POLICY_REASON: &str = "picked by scheduling policy";

/// Default cap on the number of decisions recorded on a policy snapshot
/// status.
pub const DEFAULT_MAX_CLUSTER_DECISION_COUNT: usize = 20;

#[derive(Debug, Clone)]
pub struct FrameworkOptions {
    /// Workers used to fan plugin calls out across the cluster population.
    pub num_workers: usize,
    pub max_cluster_decision_count: usize,
    pub heartbeat_freshness_window: Duration,
}

impl Default for FrameworkOptions {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            max_cluster_decision_count: DEFAULT_MAX_CLUSTER_DECISION_COUNT,
            heartbeat_freshness_window: Duration::from_secs(300),
        }
    }
}

/// The scheduling framework: drives one scheduling cycle for a placement,
/// running the profile's plugin pipeline over the observed cluster
/// population and reconciling the outcome against the placement's bindings.
pub struct Framework {
    profile: Profile,
    store: Arc<dyn ObjectStore>,
    parallelizer: Parallelizer,
    max_cluster_decision_count: usize,
    heartbeat_freshness_window: Duration,
    metrics: Arc<SchedulerMetrics>,
}

/// A cluster rejected at the Filter stage, with the status explaining why.
/// Kept so the decision record can tell the user what happened.
struct FilteredCluster {
    cluster: MemberCluster,
    status: Status,
}

impl Framework {
    pub fn new(profile: Profile, store: Arc<dyn ObjectStore>, options: FrameworkOptions) -> Self {
        Self {
            profile,
            store,
            parallelizer: Parallelizer::new(options.num_workers),
            max_cluster_decision_count: options.max_cluster_decision_count,
            heartbeat_freshness_window: options.heartbeat_freshness_window,
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Run one scheduling cycle for a placement against its active policy
    /// snapshot. Returns an optional requeue delay on success.
    pub async fn run_scheduling_cycle(
        &self,
        token: &CancellationToken,
        placement: &PlacementName,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> Result<Option<Duration>, SchedulerError> {
        // Records the cycle latency into the histogram when dropped.
        let timer = Timer::start(&self.metrics.scheduling_cycle_latency);
        info!(
            placement = placement.get(),
            snapshot = %policy.name,
            profile = self.profile.name(),
            "scheduling cycle starts"
        );
        let result = self.run_cycle(token, placement, policy).await;
        self.metrics.scheduling_cycles.add(1, &[]);
        let latency_ms = timer.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(
                placement = placement.get(),
                snapshot = %policy.name,
                latency_ms,
                "scheduling cycle ends"
            ),
            Err(err) => warn!(
                placement = placement.get(),
                snapshot = %policy.name,
                latency_ms,
                error = %err,
                "scheduling cycle failed"
            ),
        }
        result
    }

    async fn run_cycle(
        &self,
        token: &CancellationToken,
        placement: &PlacementName,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> Result<Option<Duration>, SchedulerError> {
        if token.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        // Clusters come from the cache: the watcher guarantees every change
        // is eventually observed. Bindings are read directly to avoid
        // read-after-write over-scheduling right after a previous cycle.
        let clusters = self.store.list_clusters().await?;
        let bindings = self.store.list_bindings_for(placement).await?;

        // One instant per cycle; every time-dependent predicate in the
        // cycle, plugins included, evaluates against it.
        let now_ms = get_epoch_time_in_ms();

        let cluster_index: HashMap<_, _> = clusters
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        let classified = classify_bindings(
            policy,
            bindings,
            &cluster_index,
            now_ms,
            self.heartbeat_freshness_window,
        );

        // Bindings whose cluster left or went unhealthy are neutralized
        // before anything else; a conflict here aborts the cycle and the
        // placement is retried.
        self.mark_as_unscheduled(classified.dangling.clone()).await?;

        let state = Arc::new(CycleState::new());
        state.write(STATE_KEY_CYCLE_START_MS, Arc::new(now_ms));

        match policy.policy.placement_type {
            PlacementType::PickAll => {
                self.run_cycle_for_pick_all(token, state, policy, clusters, &classified)
                    .await
            }
            PlacementType::PickN => {
                self.run_cycle_for_pick_n(token, state, policy, clusters, &classified)
                    .await
            }
        }
    }

    async fn run_cycle_for_pick_all(
        &self,
        token: &CancellationToken,
        state: Arc<CycleState>,
        policy: &ClusterSchedulingPolicySnapshot,
        clusters: Vec<MemberCluster>,
        classified: &ClassifiedBindings,
    ) -> Result<Option<Duration>, SchedulerError> {
        self.run_pre_filter_plugins(&state, policy)?;
        let (passed, filtered) = self
            .run_filter_plugins(token, state, policy, clusters)
            .await?;

        // The Score stage is not run for PickAll; every survivor carries the
        // zero score and the sort degrades to name order, which keeps the
        // picked list deterministic.
        let mut scored: Vec<ScoredCluster> = passed
            .into_iter()
            .map(|cluster| ScoredCluster {
                cluster: cluster.name,
                score: ClusterScore::default(),
            })
            .collect();
        scored.sort_by(|a, b| a.scheduling_cmp(b));

        self.finish_cycle(token, policy, scored, filtered, classified)
            .await
    }

    async fn run_cycle_for_pick_n(
        &self,
        token: &CancellationToken,
        state: Arc<CycleState>,
        policy: &ClusterSchedulingPolicySnapshot,
        clusters: Vec<MemberCluster>,
        classified: &ClassifiedBindings,
    ) -> Result<Option<Duration>, SchedulerError> {
        let needed = policy.policy.cluster_count.ok_or_else(|| {
            SchedulerError::UnexpectedBehavior(format!(
                "policy snapshot {} is PickN but carries no cluster count",
                policy.name
            ))
        })? as usize;

        self.run_pre_filter_plugins(&state, policy)?;
        let (mut passed, filtered) = self
            .run_filter_plugins(token, state.clone(), policy, clusters)
            .await?;

        // A post-batch plugin may cap how many survivors are scored this
        // cycle; the cap is applied in name order to stay deterministic.
        passed.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(limit) = self.run_post_batch_plugins(&state, policy)? {
            passed.truncate(limit);
        }

        self.run_pre_score_plugins(&state, policy)?;
        let mut scored = self
            .run_score_plugins(token, state, policy, passed)
            .await?;

        // Highest composed score first, name ascending as the tie-break;
        // when fewer than N survive the full survivor set is the result.
        scored.sort_by(|a, b| a.scheduling_cmp(b));
        scored.truncate(needed);

        self.finish_cycle(token, policy, scored, filtered, classified)
            .await
    }

    /// Shared tail of both placement types: reconcile bindings with the
    /// picked set and record decisions on the snapshot status.
    async fn finish_cycle(
        &self,
        token: &CancellationToken,
        policy: &ClusterSchedulingPolicySnapshot,
        picked: Vec<ScoredCluster>,
        filtered: Vec<FilteredCluster>,
        classified: &ClassifiedBindings,
    ) -> Result<Option<Duration>, SchedulerError> {
        if token.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let ops = cross_reference(policy, &picked, classified);
        self.apply_binding_ops(ops).await?;
        self.record_decisions(policy, &picked, filtered).await?;
        Ok(None)
    }

    fn run_pre_filter_plugins(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> Result<(), SchedulerError> {
        for plugin in &self.profile.pre_filter_plugins {
            let status = plugin.pre_filter(state, policy);
            match status.kind() {
                StatusKind::Success => {}
                StatusKind::Skip => state.skip_filter_plugin(plugin.name()),
                StatusKind::InternalError => {
                    return Err(SchedulerError::UnexpectedBehavior(format!(
                        "pre-filter plugin failed: {status}"
                    )));
                }
                _ => {
                    // A kind a pre-filter plugin must not return.
                    return Err(SchedulerError::UnexpectedBehavior(format!(
                        "pre-filter plugin returned an unknown status: {status}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn run_filter_plugins(
        &self,
        token: &CancellationToken,
        state: Arc<CycleState>,
        policy: &ClusterSchedulingPolicySnapshot,
        clusters: Vec<MemberCluster>,
    ) -> Result<(Vec<MemberCluster>, Vec<FilteredCluster>), SchedulerError> {
        let child = token.child_token();
        let clusters = Arc::new(clusters);
        let policy = Arc::new(policy.clone());
        let plugins = self.profile.filter_plugins.clone();

        let passed = Arc::new(Mutex::new(Vec::new()));
        let filtered = Arc::new(Mutex::new(Vec::new()));
        let err_flag: Arc<ErrorFlag<Status>> = Arc::new(ErrorFlag::new());

        let work = {
            let clusters = clusters.clone();
            let passed = passed.clone();
            let filtered = filtered.clone();
            let err_flag = err_flag.clone();
            let child = child.clone();
            move |piece: usize| {
                let cluster = &clusters[piece];
                for plugin in &plugins {
                    if state.is_filter_plugin_skipped(plugin.name()) {
                        continue;
                    }
                    let status = plugin.filter(&state, &policy, cluster);
                    match status.kind() {
                        StatusKind::Success => {}
                        StatusKind::ClusterUnschedulable => {
                            filtered.lock().unwrap().push(FilteredCluster {
                                cluster: cluster.clone(),
                                status,
                            });
                            return;
                        }
                        _ => {
                            // Any kind a filter plugin must not return is an
                            // internal error; latch it and stop dispatch.
                            let status = if status.is_internal_error() {
                                status
                            } else {
                                Status::internal_error(
                                    plugin.name(),
                                    format!("filter plugin returned an unknown status: {status}"),
                                )
                            };
                            err_flag.raise(status);
                            child.cancel();
                            return;
                        }
                    }
                }
                passed.lock().unwrap().push(cluster.clone());
            }
        };

        self.parallelizer
            .parallelize(&child, clusters.len(), work, "run_filter_plugins")
            .await;

        if let Some(status) = err_flag.lower() {
            return Err(SchedulerError::UnexpectedBehavior(format!(
                "filter plugin failed: {status}"
            )));
        }
        if token.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let passed = Arc::into_inner(passed)
            .expect("filter workers have exited")
            .into_inner()
            .unwrap();
        let filtered = Arc::into_inner(filtered)
            .expect("filter workers have exited")
            .into_inner()
            .unwrap();
        Ok((passed, filtered))
    }

    fn run_post_batch_plugins(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> Result<Option<usize>, SchedulerError> {
        let mut limit: Option<usize> = None;
        for plugin in &self.profile.post_batch_plugins {
            let (size, status) = plugin.post_batch(state, policy);
            match status.kind() {
                StatusKind::Success => limit = Some(limit.map_or(size, |l| l.min(size))),
                StatusKind::Skip => {}
                _ => {
                    return Err(SchedulerError::UnexpectedBehavior(format!(
                        "post-batch plugin failed: {status}"
                    )));
                }
            }
        }
        Ok(limit)
    }

    fn run_pre_score_plugins(
        &self,
        state: &CycleState,
        policy: &ClusterSchedulingPolicySnapshot,
    ) -> Result<(), SchedulerError> {
        for plugin in &self.profile.pre_score_plugins {
            let status = plugin.pre_score(state, policy);
            if !status.is_success() {
                return Err(SchedulerError::UnexpectedBehavior(format!(
                    "pre-score plugin failed: {status}"
                )));
            }
        }
        Ok(())
    }

    async fn run_score_plugins(
        &self,
        token: &CancellationToken,
        state: Arc<CycleState>,
        policy: &ClusterSchedulingPolicySnapshot,
        clusters: Vec<MemberCluster>,
    ) -> Result<Vec<ScoredCluster>, SchedulerError> {
        let child = token.child_token();
        let clusters = Arc::new(clusters);
        let policy = Arc::new(policy.clone());
        let plugins = self.profile.score_plugins.clone();

        let scored = Arc::new(Mutex::new(Vec::new()));
        let err_flag: Arc<ErrorFlag<Status>> = Arc::new(ErrorFlag::new());

        let work = {
            let clusters = clusters.clone();
            let scored = scored.clone();
            let err_flag = err_flag.clone();
            let child = child.clone();
            move |piece: usize| {
                let cluster = &clusters[piece];
                let mut total = ClusterScore::default();
                for plugin in &plugins {
                    let (score, status) = plugin.score(&state, &policy, cluster);
                    if !status.is_success() {
                        let status = if status.is_internal_error() {
                            status
                        } else {
                            Status::internal_error(
                                plugin.name(),
                                format!("score plugin returned an unknown status: {status}"),
                            )
                        };
                        err_flag.raise(status);
                        child.cancel();
                        return;
                    }
                    total = total.add(&score);
                }
                scored.lock().unwrap().push(ScoredCluster {
                    cluster: cluster.name.clone(),
                    score: total,
                });
            }
        };

        self.parallelizer
            .parallelize(&child, clusters.len(), work, "run_score_plugins")
            .await;

        if let Some(status) = err_flag.lower() {
            return Err(SchedulerError::UnexpectedBehavior(format!(
                "score plugin failed: {status}"
            )));
        }
        if token.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        Ok(Arc::into_inner(scored)
            .expect("score workers have exited")
            .into_inner()
            .unwrap())
    }

    /// Apply binding mutations in an order that minimizes the window in
    /// which the dispatcher can observe a cluster as deselected before it is
    /// reselected: creates, then updates, then mark-unscheduled.
    async fn apply_binding_ops(&self, ops: BindingOps) -> Result<(), SchedulerError> {
        for binding in ops.to_create {
            info!(
                binding = %binding.name,
                cluster = binding.target_cluster.get(),
                reason = PICKED_BY_POLICY_REASON,
                "creating binding"
            );
            self.store.create_binding(binding).await?;
            self.metrics.bindings_created.add(1, &[]);
        }
        for binding in ops.to_update {
            info!(
                binding = %binding.name,
                cluster = binding.target_cluster.get(),
                "refreshing binding"
            );
            self.store.update_binding(binding).await?;
            self.metrics.bindings_updated.add(1, &[]);
        }
        self.mark_as_unscheduled(ops.to_unschedule).await
    }

    /// Mark bindings as Unscheduled, the terminal state for scheduler
    /// writes. The flipped binding is disregarded by every later cycle.
    async fn mark_as_unscheduled(
        &self,
        bindings: Vec<ClusterResourceBinding>,
    ) -> Result<(), SchedulerError> {
        for mut binding in bindings {
            info!(
                binding = %binding.name,
                cluster = binding.target_cluster.get(),
                "marking binding as unscheduled"
            );
            binding.state = BindingState::Unscheduled;
            self.store.update_binding(binding).await?;
            self.metrics.bindings_unscheduled.add(1, &[]);
        }
        Ok(())
    }

    /// Record up to `max_cluster_decision_count` decisions on the snapshot
    /// status: picked clusters first, then unschedulable explanations in
    /// name order filling the remaining slots.
    async fn record_decisions(
        &self,
        policy: &ClusterSchedulingPolicySnapshot,
        picked: &[ScoredCluster],
        mut filtered: Vec<FilteredCluster>,
    ) -> Result<(), SchedulerError> {
        let cap = self.max_cluster_decision_count;
        let mut decisions: Vec<ClusterDecision> = picked
            .iter()
            .take(cap)
            .map(|s| ClusterDecision {
                cluster_name: s.cluster.clone(),
                selected: true,
                score: Some(s.score),
                reason: PICKED_BY_POLICY_REASON.to_string(),
            })
            .collect();

        filtered.sort_by(|a, b| a.cluster.name.cmp(&b.cluster.name));
        for rejected in filtered.iter().take(cap.saturating_sub(decisions.len())) {
            decisions.push(ClusterDecision {
                cluster_name: rejected.cluster.name.clone(),
                selected: false,
                score: None,
                reason: rejected.status.to_string(),
            });
        }

        let status = PolicySnapshotStatus {
            decisions,
            observed_at_ms: get_epoch_time_in_ms(),
        };
        self.store
            .update_policy_snapshot_status(&policy.name, status)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        data_model::{test_objects::tests::*, Affinity, LabelSelector, PreferredClusterSelector},
        scheduler::{
            framework::plugin::{FilterPlugin, Plugin},
            plugins::default_profile,
        },
        store::memory::InMemoryStore,
    };

    fn test_options() -> FrameworkOptions {
        FrameworkOptions::default()
    }

    fn test_framework(store: Arc<InMemoryStore>) -> Framework {
        let handle = plugin::Handle {
            store: store.clone(),
            heartbeat_freshness_window: test_options().heartbeat_freshness_window,
        };
        Framework::new(default_profile(&handle), store, test_options())
    }

    async fn seed_ready_clusters(store: &InMemoryStore, names: &[&str]) {
        let now = get_epoch_time_in_ms();
        for name in names {
            store.put_cluster(ready_cluster(name, now)).await;
        }
    }

    #[tokio::test]
    async fn pick_all_creates_bindings_for_eligible_clusters() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1", "member-2", "member-3"]).await;
        store.put_cluster(left_cluster("member-4")).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let bindings = store
            .list_bindings_for(&TEST_PLACEMENT.into())
            .await
            .unwrap();
        assert_eq!(bindings.len(), 3);
        let mut targets: Vec<&str> = bindings.iter().map(|b| b.target_cluster.get()).collect();
        targets.sort();
        assert_eq!(targets, vec!["member-1", "member-2", "member-3"]);
        for binding in &bindings {
            assert_eq!(binding.state, BindingState::Scheduled);
            assert_eq!(binding.policy_snapshot_name, snapshot.name);
        }

        // Decisions: the three picked clusters, then the ineligible one as
        // an explanation.
        let recorded = store.get_policy_snapshot(&snapshot.name).await.unwrap();
        let decisions = recorded.status.decisions;
        assert_eq!(decisions.len(), 4);
        assert!(decisions[..3].iter().all(|d| d.selected));
        assert_eq!(decisions[3].cluster_name.get(), "member-4");
        assert!(!decisions[3].selected);
    }

    #[tokio::test]
    async fn pick_all_picked_list_is_deterministic() {
        let store = Arc::new(InMemoryStore::new());
        let names: Vec<String> = (0..20).map(|i| format!("member-{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed_ready_clusters(&store, &refs).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let recorded = store.get_policy_snapshot(&snapshot.name).await.unwrap();
        let picked: Vec<String> = recorded
            .status
            .decisions
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.cluster_name.get().to_string())
            .collect();
        let mut sorted = picked.clone();
        sorted.sort();
        assert_eq!(picked, sorted, "picked clusters are listed in name order");
    }

    #[tokio::test]
    async fn cycle_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1", "member-2"]).await;
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();
        let writes_after_first = store.binding_write_count();
        assert_eq!(writes_after_first, 2);

        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();
        assert_eq!(
            store.binding_write_count(),
            writes_after_first,
            "re-running the cycle over its own output writes nothing"
        );
    }

    #[tokio::test]
    async fn dangling_bindings_are_neutralized() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1"]).await;
        store.put_cluster(left_cluster("member-2")).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;
        let dangling = scheduled_binding(TEST_PLACEMENT, "member-2", &snapshot.name);
        store.put_binding(dangling.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let neutralized = store.get_binding(&dangling.name).await.unwrap();
        assert_eq!(neutralized.state, BindingState::Unscheduled);
    }

    #[tokio::test]
    async fn unscheduled_bindings_are_never_resurrected() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1"]).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;
        let terminal = binding_in_state(
            TEST_PLACEMENT,
            "member-1",
            &snapshot.name,
            BindingState::Unscheduled,
        );
        store.put_binding(terminal.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        // The terminal binding is untouched; the re-pick produced a fresh
        // binding under a different name.
        let kept = store.get_binding(&terminal.name).await.unwrap();
        assert_eq!(kept.state, BindingState::Unscheduled);
        assert_eq!(kept.resource_version, terminal.resource_version);

        let bindings = store
            .list_bindings_for(&TEST_PLACEMENT.into())
            .await
            .unwrap();
        let live: Vec<_> = bindings
            .iter()
            .filter(|b| b.state == BindingState::Scheduled)
            .collect();
        assert_eq!(live.len(), 1);
        assert_ne!(live[0].name, terminal.name);
    }

    #[tokio::test]
    async fn pick_n_selects_top_scorers() {
        let store = Arc::new(InMemoryStore::new());
        let now = get_epoch_time_in_ms();
        for (name, tier) in [("member-1", "gold"), ("member-2", "silver"), ("member-3", "gold")] {
            store
                .put_cluster(ready_cluster_with_labels(
                    name,
                    now,
                    BTreeMap::from([("tier".to_string(), tier.to_string())]),
                ))
                .await;
        }

        let mut policy = pick_n_policy(2);
        policy.affinity = Some(Affinity {
            required: None,
            preferred: vec![PreferredClusterSelector {
                weight: 10,
                selector: LabelSelector {
                    match_labels: BTreeMap::from([("tier".to_string(), "gold".to_string())]),
                    match_expressions: vec![],
                },
            }],
        });
        let snapshot = latest_snapshot(TEST_PLACEMENT, policy);
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let bindings = store
            .list_bindings_for(&TEST_PLACEMENT.into())
            .await
            .unwrap();
        let mut targets: Vec<&str> = bindings.iter().map(|b| b.target_cluster.get()).collect();
        targets.sort();
        assert_eq!(targets, vec!["member-1", "member-3"]);

        let recorded = store.get_policy_snapshot(&snapshot.name).await.unwrap();
        let picked: Vec<_> = recorded
            .status
            .decisions
            .iter()
            .filter(|d| d.selected)
            .collect();
        assert_eq!(picked.len(), 2);
        assert!(picked
            .iter()
            .all(|d| d.score.unwrap().affinity_score == 10));
    }

    #[tokio::test]
    async fn pick_n_short_population_takes_all_survivors() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1", "member-2"]).await;
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_n_policy(5));
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let bindings = store
            .list_bindings_for(&TEST_PLACEMENT.into())
            .await
            .unwrap();
        assert_eq!(bindings.len(), 2, "no padding past the survivor set");
    }

    #[tokio::test]
    async fn pick_n_without_count_is_unexpected_behavior() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1"]).await;
        let mut policy = pick_n_policy(1);
        policy.cluster_count = None;
        let snapshot = latest_snapshot(TEST_PLACEMENT, policy);
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        let err = framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnexpectedBehavior(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn decision_count_is_capped() {
        let store = Arc::new(InMemoryStore::new());
        let names: Vec<String> = (0..30).map(|i| format!("member-{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed_ready_clusters(&store, &refs).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let recorded = store.get_policy_snapshot(&snapshot.name).await.unwrap();
        assert_eq!(
            recorded.status.decisions.len(),
            DEFAULT_MAX_CLUSTER_DECISION_COUNT
        );
        assert!(recorded.status.decisions.iter().all(|d| d.selected));
    }

    struct FailingFilter;

    impl Plugin for FailingFilter {
        fn name(&self) -> &'static str {
            "failing-filter"
        }
    }

    impl FilterPlugin for FailingFilter {
        fn filter(
            &self,
            _state: &CycleState,
            _policy: &ClusterSchedulingPolicySnapshot,
            _cluster: &MemberCluster,
        ) -> Status {
            Status::internal_error(self.name(), "boom")
        }
    }

    #[tokio::test]
    async fn filter_internal_error_aborts_without_binding_writes() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1", "member-2"]).await;
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let profile = Profile::new("failing").with_filter_plugin(Arc::new(FailingFilter));
        let framework = Framework::new(profile, store.clone(), test_options());
        let token = CancellationToken::new();
        let err = framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::UnexpectedBehavior(_)));
        assert_eq!(store.binding_write_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_cycle_issues_no_binding_writes() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1"]).await;
        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        token.cancel();
        let err = framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Cancelled));
        assert!(err.is_retryable());
        assert_eq!(store.binding_write_count(), 0);
    }

    #[tokio::test]
    async fn obsolete_bindings_are_refreshed_in_place() {
        let store = Arc::new(InMemoryStore::new());
        seed_ready_clusters(&store, &["member-1"]).await;

        // The binding predates the active snapshot.
        let old_binding = scheduled_binding(TEST_PLACEMENT, "member-1", "crp-1-snapshot-0");
        store.put_binding(old_binding.clone()).await;

        let snapshot = latest_snapshot(TEST_PLACEMENT, pick_all_policy());
        store.put_policy_snapshot(snapshot.clone()).await;

        let framework = test_framework(store.clone());
        let token = CancellationToken::new();
        framework
            .run_scheduling_cycle(&token, &TEST_PLACEMENT.into(), &snapshot)
            .await
            .unwrap();

        let refreshed = store.get_binding(&old_binding.name).await.unwrap();
        assert_eq!(refreshed.policy_snapshot_name, snapshot.name);
        assert_eq!(refreshed.state, BindingState::Scheduled);
        let bindings = store
            .list_bindings_for(&TEST_PLACEMENT.into())
            .await
            .unwrap();
        assert_eq!(bindings.len(), 1, "no duplicate binding is created");
    }
}
