//! Placement-gate admission rule.
//!
//! New workloads are held back with [`keys::PLACEMENT_GATE`] until the
//! planner picks a node, except for system namespaces, opted-out workloads,
//! host-network workloads, and per-node daemons.

use tracing::debug;

use recluster_state::{Workload, keys};

const SYSTEM_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

/// Why a workload is left ungated, or `None` if it should be gated.
pub fn exemption(workload: &Workload) -> Option<&'static str> {
    let meta = &workload.metadata;
    if SYSTEM_NAMESPACES.contains(&meta.namespace.as_str()) {
        return Some("system namespace");
    }
    if meta.annotations.get(keys::POLICY_SKIP).map(String::as_str) == Some("true") {
        return Some("skip annotation");
    }
    if workload.spec.host_network {
        return Some("host network");
    }
    if meta.owner_references.iter().any(|o| o.kind == "DaemonSet") {
        return Some("daemonset owned");
    }
    if workload.has_gate() {
        return Some("already gated");
    }
    None
}

pub fn should_gate(workload: &Workload) -> bool {
    exemption(workload).is_none()
}

/// Append the placement gate unless exempt. Returns whether it was added.
pub fn admit(workload: &mut Workload) -> bool {
    if let Some(why) = exemption(workload) {
        debug!(workload = %workload.table_key(), why, "admission: not gated");
        return false;
    }
    workload
        .spec
        .scheduling_gates
        .push(keys::PLACEMENT_GATE.to_string());
    debug!(workload = %workload.table_key(), "admission: gated");
    true
}
