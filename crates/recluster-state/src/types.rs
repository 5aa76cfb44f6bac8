//! Cluster documents: nodes, policies, and workloads.
//!
//! Field names follow the JSON wire contract (camelCase) shared with other
//! tooling, so renaming a field here is a breaking change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a node (the RcNode name).
pub type NodeName = String;

/// Well-known annotation, label, gate, and toleration keys.
pub mod keys {
    /// Scheduling gate holding a workload back until placement is decided.
    pub const PLACEMENT_GATE: &str = "recluster-sync/waiting-for-node";
    /// Annotation carrying the resolved target node.
    pub const TARGET_NODE: &str = "recluster.io/rcnode";
    /// Annotation naming the policy a workload wants.
    pub const POLICY_NAME: &str = "recluster.io/policy-name";
    /// Annotation opting a workload out of policy placement (`"true"`).
    pub const POLICY_SKIP: &str = "recluster.io/policy-skip";
    /// Toleration and node-selector key scoping a workload to one node.
    pub const NODE_SCOPE: &str = "recluster.io/node";
}

// ── Metadata ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

// ── RcNode ────────────────────────────────────────────────────────

/// A schedulable unit of compute capacity that can be powered on and off.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RcNode {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RcNodeSpec,
    #[serde(default)]
    pub status: RcNodeStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RcNodeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<NodeRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_pool: String,

    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub cpu: RcNodeCpuSpec,
    /// Memory size in bytes.
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default, rename = "storages", skip_serializing_if = "Vec::is_empty")]
    pub storage: Vec<RcNodeStorageSpec>,
    #[serde(default, rename = "interfaces", skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<RcNodeInterfaceSpec>,

    #[serde(default)]
    pub min_power_consumption: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_efficiency_power_consumption: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_performance_power_consumption: Option<u32>,
    #[serde(default)]
    pub max_power_consumption: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_curve: Option<PowerCurve>,

    /// Cold-boot latency in seconds; 0 means the node can be powered off
    /// and back on without a boot delay.
    #[serde(default)]
    pub boot_seconds: u64,
    #[serde(default)]
    pub desired_state: DesiredState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RcNodeCpuSpec {
    #[serde(default)]
    pub architecture: CpuArchitecture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<CpuVendor>,
    #[serde(default)]
    pub family: u32,
    #[serde(default)]
    pub model: u32,
    #[serde(default)]
    pub name: String,
    pub cores: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default)]
    pub cache_l1d: u32,
    #[serde(default)]
    pub cache_l1i: u32,
    #[serde(default)]
    pub cache_l2: u32,
    #[serde(default)]
    pub cache_l3: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<String>,
    #[serde(default)]
    pub single_thread_score: u32,
    #[serde(default)]
    pub multi_thread_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RcNodeStorageSpec {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RcNodeInterfaceSpec {
    pub name: String,
    pub address: String,
    /// Link speed in bits per second.
    #[serde(default)]
    pub speed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wol: Vec<WolFlag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PowerCurve {
    pub points: Vec<PowerCurvePoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PowerCurvePoint {
    pub load_pct: u32,
    pub power_watts: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DesiredState {
    #[default]
    #[serde(rename = "")]
    Unset,
    Running,
    Stopped,
}

/// Observed node state, written by the backend or a real node agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Active,
    ActiveReady,
    ActiveNotReady,
    ActiveDeleting,
    Booting,
    Inactive,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    ReclusterController,
    K8sController,
    K8sWorker,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CpuArchitecture {
    #[default]
    Amd64,
    Arm64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CpuVendor {
    Amd,
    Intel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WolFlag {
    A,
    B,
    G,
    M,
    P,
    S,
    U,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RcNodeStatus {
    #[serde(default)]
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Timestamp of the last observed state change. Owned by the backend;
    /// the planner only reads it for boot-ETA and cooldown windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<DateTime<Utc>>,
    #[serde(default)]
    pub node_pool_assigned: bool,
    #[serde(default, rename = "utilizationMilliCPU")]
    pub utilization_milli_cpu: u32,
    #[serde(default)]
    pub utilization_pct: f64,
    #[serde(default)]
    pub predicted_power_watts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_power_watts: Option<u32>,
}

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl RcNode {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Observed running and able to accept workloads.
    pub fn is_ready(&self) -> bool {
        self.spec.desired_state == DesiredState::Running
            && matches!(self.status.state, NodeState::Active | NodeState::ActiveReady)
    }

    pub fn is_booting(&self) -> bool {
        self.status.state == NodeState::Booting
    }

    pub fn wants_running(&self) -> bool {
        self.spec.desired_state == DesiredState::Running
    }
}

impl RcNodeSpec {
    /// Memory size in GiB.
    pub fn memory_gib(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_GIB
    }

    /// Predicted power draw at `load_pct` (0–100).
    ///
    /// Interpolates linearly along the power curve, clamped at its ends.
    /// Without a curve, interpolates between min and max consumption.
    pub fn predicted_power_watts(&self, load_pct: f64) -> f64 {
        let load = load_pct.clamp(0.0, 100.0);
        let mut points: Vec<PowerCurvePoint> = self
            .power_curve
            .as_ref()
            .map(|c| c.points.clone())
            .unwrap_or_default();

        if points.is_empty() {
            let min = f64::from(self.min_power_consumption);
            let max = f64::from(self.max_power_consumption.max(self.min_power_consumption));
            return min + (max - min) * load / 100.0;
        }

        points.sort_by_key(|p| p.load_pct);
        let first = points[0];
        let last = points[points.len() - 1];
        if load <= f64::from(first.load_pct) {
            return f64::from(first.power_watts);
        }
        if load >= f64::from(last.load_pct) {
            return f64::from(last.power_watts);
        }
        for pair in points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            let (lo_x, hi_x) = (f64::from(lo.load_pct), f64::from(hi.load_pct));
            if load >= lo_x && load <= hi_x {
                if hi_x == lo_x {
                    return f64::from(hi.power_watts);
                }
                let t = (load - lo_x) / (hi_x - lo_x);
                return f64::from(lo.power_watts)
                    + t * (f64::from(hi.power_watts) - f64::from(lo.power_watts));
            }
        }
        f64::from(last.power_watts)
    }
}

// ── RcPolicy ──────────────────────────────────────────────────────

/// A named scoring and filtering profile for workload placement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RcPolicy {
    pub metadata: ObjectMeta,
    pub spec: RcPolicySpec,
    #[serde(default)]
    pub status: RcPolicyStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RcPolicySpec {
    /// Workloads governed by this policy. `None` marks a cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default)]
    pub metrics: Vec<PolicyMetric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hard_constraints: Vec<PolicyConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<PolicyScheduleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_feeds: Vec<ExternalFeedRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    /// `In`, `NotIn`, `Exists`, or `DoesNotExist`. Kept as text so a typo
    /// surfaces as a resolution error instead of a rejected document.
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Where a metric value is read from inside an RcNode document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueFrom {
    #[default]
    #[serde(rename = "jsonPath")]
    JsonPath,
    #[serde(rename = "fieldPath")]
    FieldPath,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMetric {
    pub key: String,
    /// Positive minimises the metric, negative maximises it.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ValueFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Expression over `x` applied to the raw value before weighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl PolicyMetric {
    pub fn new(key: &str, weight: f64) -> Self {
        Self {
            key: key.to_string(),
            weight,
            source: None,
            selector: None,
            transform: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConstraint {
    pub expression: String,
}

/// Replaces or scales metric weights inside a daily local-time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyScheduleEntry {
    pub name: String,
    /// "HH:MM", inclusive.
    pub start: String,
    /// "HH:MM", exclusive. `end <= start` wraps past midnight.
    pub end: String,
    #[serde(default)]
    pub adjustments: Vec<MetricAdjustment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricAdjustment {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiply: Option<f64>,
}

/// Live numeric input (spot price, carbon intensity, ...) that scales
/// metric weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalFeedRef {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mappings: Vec<FeedMetricMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedMetricMapping {
    pub key: String,
    /// Expression over `value` producing the weight multiplier.
    pub transform: String,
}

/// Controller-written policy status. Never read by the scorer, except for
/// the feed samples the syncer deposits here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RcPolicyStatus {
    #[serde(default)]
    pub matched_pods: u32,
    #[serde(default)]
    pub rejected_pods: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_feed_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feeds: BTreeMap<String, FeedSample>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedSample {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

impl RcPolicy {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Latest sampled value of the named feed, if the syncer has one.
    pub fn feed_value(&self, feed: &str) -> Option<f64> {
        self.status.feeds.get(feed).map(|s| s.value)
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// The unit requesting placement (a pod).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkloadSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scheduling_gates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub host_network: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TolerationOperator {
    Equal,
    Exists,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Namespaced reference to a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Workload {
    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn has_gate(&self) -> bool {
        self.spec
            .scheduling_gates
            .iter()
            .any(|g| g == keys::PLACEMENT_GATE)
    }

    /// Node this workload has been bound to, if any.
    pub fn target_node(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(keys::TARGET_NODE)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Gated and not yet bound to a node.
    pub fn is_pending(&self) -> bool {
        self.has_gate() && self.target_node().is_none()
    }
}

// ── Table keys ────────────────────────────────────────────────────

impl RcNode {
    /// Build the key for the nodes table.
    pub fn table_key(&self) -> String {
        self.metadata.name.clone()
    }
}

impl RcPolicy {
    /// Build the key for the policies table.
    pub fn table_key(&self) -> String {
        self.metadata.name.clone()
    }
}

impl Workload {
    /// Build the composite key for the workloads table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}
