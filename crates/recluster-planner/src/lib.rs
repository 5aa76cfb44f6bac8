//! recluster-planner — node lifecycle planning.
//!
//! Each step resolves a policy for every pending workload, picks a node,
//! and emits a deduplicated list of actions: start a node, stop an idle
//! node, bind a workload. Boot latency and an idle cooldown keep nodes
//! from thrashing.
//!
//! # Node lifecycle
//!
//! ```text
//!   INACTIVE ──Start──► BOOTING ──(bootSeconds)──► ACTIVE_READY
//!      ▲                                               │
//!      └──────────Stop (unneeded ≥ idle cooldown)──────┘
//! ```
//!
//! The planner never stores this machine; it is re-derived from each
//! snapshot. A node that is `BOOTING` receives neither a second Start nor
//! a Stop.
//!
//! # Components
//!
//! - **`action`** — the `Action` union consumed by backends
//! - **`planner`** — the step function, with deadline and shutdown cancellation
//! - **`executor`** — `Backend` trait, simulated `StoreBackend`, `DryRunBackend`
//! - **`controller`** — periodic snapshot → plan → apply loop

pub mod action;
pub mod controller;
pub mod error;
pub mod executor;
pub mod planner;

pub use action::{Action, NodeAction, NodeActionKind, WorkloadPatch};
pub use controller::{Controller, TickSummary};
pub use error::{BackendError, BackendResult, StepError, StepResult};
pub use executor::{Backend, DryRunBackend, StoreBackend};
pub use planner::{Cancel, Plan, Planner, PlannerConfig, PolicyTally, StepReport};

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use recluster_state::{
        DesiredState, NodeState, ObjectMeta, PolicyConstraint, PolicyMetric, RcNode,
        RcNodeCpuSpec, RcNodeSpec, RcPolicy, RcPolicySpec, Workload, WorkloadSpec, keys,
    };

    const GIB: u64 = 1024 * 1024 * 1024;

    pub fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn node(name: &str, cores: u32, ram_gib: u64, boot: u64, min_watts: u32) -> RcNode {
        RcNode {
            metadata: ObjectMeta::named(name),
            spec: RcNodeSpec {
                cpu: RcNodeCpuSpec {
                    cores,
                    ..Default::default()
                },
                memory_bytes: ram_gib * GIB,
                boot_seconds: boot,
                min_power_consumption: min_watts,
                max_power_consumption: min_watts * 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn tiny() -> RcNode {
        node("tiny", 2, 4, 30, 20)
    }

    pub fn medium() -> RcNode {
        node("medium", 4, 16, 60, 40)
    }

    pub fn fat() -> RcNode {
        node("fat", 8, 32, 90, 80)
    }

    /// Desired Running, observed ready since `since`.
    pub fn running(mut node: RcNode, since: DateTime<Utc>) -> RcNode {
        node.spec.desired_state = DesiredState::Running;
        node.status.state = NodeState::ActiveReady;
        node.status.last_transition = Some(since);
        node
    }

    pub fn pending(name: &str) -> Workload {
        let mut meta = ObjectMeta::named(name);
        meta.namespace = "prod".to_string();
        Workload {
            metadata: meta,
            spec: WorkloadSpec {
                scheduling_gates: vec![keys::PLACEMENT_GATE.to_string()],
                ..Default::default()
            },
        }
    }

    pub fn bound(name: &str, node: &str, gated: bool) -> Workload {
        let mut w = pending(name);
        w.metadata
            .annotations
            .insert(keys::TARGET_NODE.to_string(), node.to_string());
        if !gated {
            w.spec.scheduling_gates.clear();
        }
        w
    }

    /// Cluster-default policy minimising boot time, then cores.
    pub fn default_policy(name: &str, constraint: &str) -> RcPolicy {
        let mut meta = ObjectMeta::named(name);
        meta.creation_timestamp = Some(Utc.timestamp_opt(1_000, 0).unwrap());
        RcPolicy {
            metadata: meta,
            spec: RcPolicySpec {
                metrics: vec![PolicyMetric::new("boot", 1.0), PolicyMetric::new("cpu", 0.2)],
                hard_constraints: vec![PolicyConstraint {
                    expression: constraint.to_string(),
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
