
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{self, Display},
    ops::Deref,
    time::Duration,
};

use derive_builder::Builder;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Longest name accepted for any fleet object, per RFC 1123 label rules.
pub const MAX_OBJECT_NAME_LEN: usize = 63;

/// Returns true if `name` is a valid RFC 1123 label: non-empty, at most 63
/// characters, lowercase alphanumeric or '-', alphanumeric at both ends.
///
/// Objects with non-conforming names cannot be created upstream; readers
/// treat any such object as absent.
pub fn is_valid_object_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
        return false;
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[serde(transparent)]
pub struct ClusterName(String);

impl ClusterName {
    pub fn new(name: String) -> Self {
        Self(name)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClusterName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Deref for ClusterName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[serde(transparent)]
pub struct PlacementName(String);

impl PlacementName {
    pub fn new(name: String) -> Self {
        Self(name)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for PlacementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlacementName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Deref for PlacementName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Join intent declared in the cluster spec by the operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum ClusterState {
    Join,
    Leave,
}

/// Kind of agent reporting status from a member cluster. Only the member
/// agent participates in eligibility checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum AgentKind {
    MemberAgent,
    NetworkingAgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum AgentConditionType {
    Joined,
    Healthy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCondition {
    pub condition_type: AgentConditionType,
    pub status: ConditionStatus,
    pub last_transition_time_ms: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStatus {
    pub agent: AgentKind,
    /// Ordered condition history; the most recent entry of a type wins.
    pub conditions: Vec<AgentCondition>,
    pub last_received_heartbeat_ms: u64,
}

impl AgentStatus {
    /// The most recent condition of the given type, if any.
    pub fn condition(&self, condition_type: AgentConditionType) -> Option<&AgentCondition> {
        self.conditions
            .iter()
            .rev()
            .find(|c| c.condition_type == condition_type)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum TaintEffect {
    NoSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Toleration {
    /// Empty key with the Exists operator tolerates every taint.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// None tolerates all effects.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A label selector in the usual match-labels plus match-expressions form.
/// An empty selector matches everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreferredClusterSelector {
    pub weight: i64,
    pub selector: LabelSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Affinity {
    #[serde(default)]
    pub required: Option<LabelSelector>,
    #[serde(default)]
    pub preferred: Vec<PreferredClusterSelector>,
}

impl Affinity {
    pub fn is_empty(&self) -> bool {
        self.required.is_none() && self.preferred.is_empty()
    }
}

/// A member cluster as observed through the object store. The scheduler is a
/// pure reader; clusters are mutated only by operators and agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
pub struct MemberCluster {
    #[builder(setter(into))]
    pub name: ClusterName,
    pub state: ClusterState,
    #[builder(default)]
    pub labels: BTreeMap<String, String>,
    #[builder(default)]
    pub taints: Vec<Taint>,
    #[builder(default)]
    pub agent_status: Vec<AgentStatus>,
    #[builder(default)]
    pub resource_version: u64,
}

impl MemberCluster {
    pub fn member_agent_status(&self) -> Option<&AgentStatus> {
        self.agent_status
            .iter()
            .find(|s| s.agent == AgentKind::MemberAgent)
    }

    /// Whether the cluster is in a normally operating state and may receive
    /// placements: it intends to join, its member agent has joined and
    /// reports healthy, and the agent heartbeat falls within the freshness
    /// window ending at `now_ms`.
    pub fn is_eligible(&self, now_ms: u64, freshness_window: Duration) -> bool {
        if self.state != ClusterState::Join {
            return false;
        }
        let Some(agent) = self.member_agent_status() else {
            return false;
        };
        let joined = agent
            .condition(AgentConditionType::Joined)
            .is_some_and(|c| c.status == ConditionStatus::True);
        let healthy = agent
            .condition(AgentConditionType::Healthy)
            .is_some_and(|c| c.status == ConditionStatus::True);
        let fresh = now_ms.saturating_sub(agent.last_received_heartbeat_ms)
            <= freshness_window.as_millis() as u64;
        joined && healthy && fresh
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum PlacementType {
    PickAll,
    PickN,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
pub struct SchedulingPolicy {
    pub placement_type: PlacementType,
    /// Number of clusters to pick; set for PickN policies only.
    #[builder(default)]
    pub cluster_count: Option<u32>,
    #[builder(default)]
    pub affinity: Option<Affinity>,
    #[builder(default)]
    pub tolerations: Vec<Toleration>,
}

/// Per-cluster scheduling outcome recorded on the policy snapshot status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterDecision {
    pub cluster_name: ClusterName,
    pub selected: bool,
    #[serde(default)]
    pub score: Option<ClusterScore>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicySnapshotStatus {
    #[serde(default)]
    pub decisions: Vec<ClusterDecision>,
    #[serde(default)]
    pub observed_at_ms: u64,
}

/// An immutable capture of a placement's scheduling policy. The snapshot
/// flagged `is_latest` is the one active for its placement; older snapshots
/// are kept for bindings that still reference them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
pub struct ClusterSchedulingPolicySnapshot {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub placement: PlacementName,
    #[builder(default = "true")]
    pub is_latest: bool,
    pub policy: SchedulingPolicy,
    #[builder(default)]
    pub status: PolicySnapshotStatus,
    #[builder(default)]
    pub resource_version: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum BindingState {
    /// Picked by the scheduler, not yet cleared by the dispatcher.
    Scheduled,
    /// Cleared for processing by the dispatcher. Never written by the
    /// scheduler.
    Bound,
    /// Terminal from the scheduler's point of view.
    Unscheduled,
}

/// Scheduler-produced intent that a placement be realized on a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
pub struct ClusterResourceBinding {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub placement: PlacementName,
    #[builder(setter(into))]
    pub target_cluster: ClusterName,
    pub state: BindingState,
    /// Name of the policy snapshot that produced this binding.
    #[builder(setter(into))]
    pub policy_snapshot_name: String,
    #[builder(default)]
    pub cluster_decision: Option<ClusterDecision>,
    #[builder(default)]
    pub resource_version: u64,
}

/// Builds a binding name from its placement and target cluster, with a short
/// random suffix. The suffix keeps re-creations for the same pair from
/// colliding with terminal (Unscheduled) bindings left behind by earlier
/// cycles.
pub fn new_binding_name(placement: &PlacementName, cluster: &ClusterName) -> String {
    let suffix: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{placement}-{cluster}-{suffix}")
}

/// Score assigned to a cluster by the Score extension point. Dimensions
/// compose lexicographically: affinity first, then topology spread. The
/// default profile only populates the affinity dimension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClusterScore {
    pub affinity_score: i64,
    pub topology_spread_score: i64,
}

impl ClusterScore {
    pub fn add(&self, other: &ClusterScore) -> ClusterScore {
        ClusterScore {
            affinity_score: self.affinity_score + other.affinity_score,
            topology_spread_score: self.topology_spread_score + other.topology_spread_score,
        }
    }
}

impl Display for ClusterScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(affinity: {}, topology spread: {})",
            self.affinity_score, self.topology_spread_score
        )
    }
}

/// A cluster paired with its composed score, valid within one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCluster {
    pub cluster: ClusterName,
    pub score: ClusterScore,
}

impl ScoredCluster {
    /// Scheduling order: higher scores first, cluster name ascending as the
    /// final tie-break. Sorting with this comparator is deterministic for
    /// any input.
    pub fn scheduling_cmp(&self, other: &ScoredCluster) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.cluster.cmp(&other.cluster))
    }
}
