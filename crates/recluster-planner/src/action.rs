//! Planner output.
//!
//! A closed union of two cases: node power transitions and workload
//! patches. Produced fresh every step and consumed by a [`Backend`]; never
//! stored.
//!
//! [`Backend`]: crate::executor::Backend

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use recluster_state::{TaintEffect, Toleration, TolerationOperator, WorkloadRef, keys};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Node(NodeAction),
    Workload(WorkloadPatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeActionKind {
    Start,
    Stop,
    #[serde(rename = "NOP")]
    Nop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAction {
    pub node: String,
    pub kind: NodeActionKind,
    /// Expected readiness (Start only): `now + bootSeconds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Bind a workload to a node, optionally releasing its placement gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadPatch {
    pub workload: WorkloadRef,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    pub remove_gate: bool,
}

impl WorkloadPatch {
    /// Target-node annotation plus a toleration and node selector scoped
    /// to `node`.
    pub fn bind(workload: WorkloadRef, node: &str, remove_gate: bool) -> Self {
        Self {
            workload,
            annotations: BTreeMap::from([(keys::TARGET_NODE.to_string(), node.to_string())]),
            tolerations: vec![Toleration {
                key: keys::NODE_SCOPE.to_string(),
                operator: TolerationOperator::Equal,
                value: Some(node.to_string()),
                effect: Some(TaintEffect::NoSchedule),
            }],
            node_selector: BTreeMap::from([(keys::NODE_SCOPE.to_string(), node.to_string())]),
            remove_gate,
        }
    }

    pub fn target_node(&self) -> Option<&str> {
        self.annotations.get(keys::TARGET_NODE).map(String::as_str)
    }
}

impl Action {
    pub fn start(node: &str, ready_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Action::Node(NodeAction {
            node: node.to_string(),
            kind: NodeActionKind::Start,
            ready_at: Some(ready_at),
            reason: reason.into(),
        })
    }

    pub fn stop(node: &str, reason: impl Into<String>) -> Self {
        Action::Node(NodeAction {
            node: node.to_string(),
            kind: NodeActionKind::Stop,
            ready_at: None,
            reason: reason.into(),
        })
    }

    pub fn as_node(&self) -> Option<&NodeAction> {
        match self {
            Action::Node(a) => Some(a),
            Action::Workload(_) => None,
        }
    }

    pub fn as_workload(&self) -> Option<&WorkloadPatch> {
        match self {
            Action::Workload(p) => Some(p),
            Action::Node(_) => None,
        }
    }
}

/// Collapse node actions sharing `(node, kind)`, keeping the first.
/// Workload patches pass through in order.
pub fn dedup(actions: Vec<Action>) -> Vec<Action> {
    let mut seen: HashSet<(String, NodeActionKind)> = HashSet::new();
    actions
        .into_iter()
        .filter(|action| match action {
            Action::Node(a) => seen.insert((a.node.clone(), a.kind)),
            Action::Workload(_) => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wref(name: &str) -> WorkloadRef {
        WorkloadRef {
            namespace: "prod".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn dedup_keeps_first_per_node_and_kind() {
        let at = Utc.timestamp_opt(100, 0).unwrap();
        let later = Utc.timestamp_opt(200, 0).unwrap();
        let actions = vec![
            Action::start("tiny", at, "first"),
            Action::Workload(WorkloadPatch::bind(wref("a"), "tiny", false)),
            Action::start("tiny", later, "second"),
            Action::Workload(WorkloadPatch::bind(wref("b"), "tiny", false)),
            Action::stop("fat", "idle timeout"),
            Action::stop("fat", "idle timeout"),
        ];
        let out = dedup(actions);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].as_node().unwrap().reason, "first");
        assert_eq!(out[1].as_workload().unwrap().workload.name, "a");
        assert_eq!(out[2].as_workload().unwrap().workload.name, "b");
        assert_eq!(out[3].as_node().unwrap().kind, NodeActionKind::Stop);
    }

    #[test]
    fn bind_patch_scopes_to_node() {
        let patch = WorkloadPatch::bind(wref("api"), "tiny", true);
        assert_eq!(patch.target_node(), Some("tiny"));
        assert_eq!(patch.node_selector[keys::NODE_SCOPE], "tiny");
        assert_eq!(patch.tolerations[0].value.as_deref(), Some("tiny"));
        assert!(patch.remove_gate);
    }

    #[test]
    fn wire_format_is_tagged() {
        let at = Utc.timestamp_opt(0, 0).unwrap();
        let json = serde_json::to_value(Action::start("tiny", at, "placement")).unwrap();
        assert_eq!(json["type"], "node");
        assert_eq!(json["kind"], "Start");
        assert_eq!(json["readyAt"], "1970-01-01T00:00:00Z");

        let json = serde_json::to_value(Action::Workload(WorkloadPatch::bind(wref("a"), "n", false))).unwrap();
        assert_eq!(json["type"], "workload");
        assert_eq!(json["removeGate"], false);
        assert_eq!(json["workload"]["namespace"], "prod");

        let nop: NodeActionKind = serde_json::from_str("\"NOP\"").unwrap();
        assert_eq!(nop, NodeActionKind::Nop);
    }
}
