//! Backend adapters that carry out planner actions.
//!
//! Delivery is at-least-once: every adapter must treat a repeated action
//! on an already-converged node or workload as a no-op.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use recluster_state::{DesiredState, NodeState, RcNode, StateError, StateStore, keys};

use crate::action::{Action, NodeAction, NodeActionKind, WorkloadPatch};
use crate::error::{BackendError, BackendResult};

pub trait Backend: Send + Sync {
    fn apply(&self, action: &Action, now: DateTime<Utc>) -> BackendResult<()>;

    /// Called once per tick before the snapshot is taken.
    fn reconcile(&self, _now: DateTime<Utc>) -> BackendResult<()> {
        Ok(())
    }
}

/// Simulated backend: writes desired and observed node state straight into
/// the state store, and completes boots on [`StoreBackend::advance`].
#[derive(Clone)]
pub struct StoreBackend {
    store: StateStore,
}

impl StoreBackend {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Mark every node whose boot window has elapsed as ready. Returns the
    /// names of nodes that became ready.
    pub fn advance(&self, now: DateTime<Utc>) -> BackendResult<Vec<String>> {
        let mut ready = Vec::new();
        for node in self.store.list_nodes()? {
            if !node.is_booting() || !boot_elapsed(&node, now) {
                continue;
            }
            self.store.update_node(node.name(), |n| {
                n.status.state = NodeState::ActiveReady;
                n.status.last_transition = Some(now);
                n.status.last_heartbeat = Some(now);
                n.status.predicted_power_watts = idle_watts(n);
            })?;
            info!(node = %node.name(), "node finished booting");
            ready.push(node.name().to_string());
        }
        Ok(ready)
    }

    fn apply_node(&self, action: &NodeAction, now: DateTime<Utc>) -> BackendResult<()> {
        let update = match action.kind {
            NodeActionKind::Nop => return Ok(()),
            NodeActionKind::Start => self.store.update_node(&action.node, |n| start(n, now)),
            NodeActionKind::Stop => self.store.update_node(&action.node, |n| stop(n, now)),
        };
        let node = update.map_err(|e| match e {
            StateError::NotFound(_) => BackendError::UnknownNode(action.node.clone()),
            other => other.into(),
        })?;
        info!(
            node = %action.node,
            kind = ?action.kind,
            reason = %action.reason,
            state = ?node.status.state,
            "node action applied"
        );
        Ok(())
    }

    fn apply_patch(&self, patch: &WorkloadPatch) -> BackendResult<()> {
        let key = patch.workload.to_string();
        self.store
            .update_workload(&key, |w| {
                for (k, v) in &patch.annotations {
                    w.metadata.annotations.insert(k.clone(), v.clone());
                }
                for toleration in &patch.tolerations {
                    if !w.spec.tolerations.contains(toleration) {
                        w.spec.tolerations.push(toleration.clone());
                    }
                }
                for (k, v) in &patch.node_selector {
                    w.spec.node_selector.insert(k.clone(), v.clone());
                }
                if patch.remove_gate {
                    w.spec.scheduling_gates.retain(|g| g != keys::PLACEMENT_GATE);
                }
            })
            .map_err(|e| match e {
                StateError::NotFound(_) => BackendError::UnknownWorkload(key.clone()),
                other => other.into(),
            })?;
        info!(
            workload = %key,
            node = patch.target_node().unwrap_or_default(),
            remove_gate = patch.remove_gate,
            "workload patched"
        );
        Ok(())
    }
}

impl Backend for StoreBackend {
    fn apply(&self, action: &Action, now: DateTime<Utc>) -> BackendResult<()> {
        match action {
            Action::Node(a) => self.apply_node(a, now),
            Action::Workload(p) => self.apply_patch(p),
        }
    }

    fn reconcile(&self, now: DateTime<Utc>) -> BackendResult<()> {
        self.advance(now).map(|_| ())
    }
}

fn start(node: &mut RcNode, now: DateTime<Utc>) {
    if node.wants_running() {
        debug!(node = %node.name(), "start ignored; already desired running");
        return;
    }
    node.spec.desired_state = DesiredState::Running;
    node.status.last_transition = Some(now);
    if node.spec.boot_seconds == 0 {
        node.status.state = NodeState::ActiveReady;
        node.status.predicted_power_watts = idle_watts(node);
    } else {
        node.status.state = NodeState::Booting;
    }
}

fn stop(node: &mut RcNode, now: DateTime<Utc>) {
    if node.spec.desired_state == DesiredState::Stopped {
        debug!(node = %node.name(), "stop ignored; already desired stopped");
        return;
    }
    node.spec.desired_state = DesiredState::Stopped;
    node.status.state = NodeState::Inactive;
    node.status.last_transition = Some(now);
    node.status.predicted_power_watts = 0;
}

fn boot_elapsed(node: &RcNode, now: DateTime<Utc>) -> bool {
    let Some(since) = node.status.last_transition else {
        return true;
    };
    let boot = i64::try_from(node.spec.boot_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    now - since >= boot
}

fn idle_watts(node: &RcNode) -> u32 {
    node.spec.predicted_power_watts(0.0).round() as u32
}

/// Logs every action and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBackend;

impl Backend for DryRunBackend {
    fn apply(&self, action: &Action, _now: DateTime<Utc>) -> BackendResult<()> {
        match action {
            Action::Node(a) => info!(node = %a.node, kind = ?a.kind, reason = %a.reason, "dry run: node action"),
            Action::Workload(p) => info!(
                workload = %p.workload,
                node = p.target_node().unwrap_or_default(),
                remove_gate = p.remove_gate,
                "dry run: workload patch"
            ),
        }
        Ok(())
    }
}
