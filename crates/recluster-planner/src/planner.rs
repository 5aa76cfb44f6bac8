//! The planning step.
//!
//! A pure function of `(snapshot, now)`: no state survives between steps,
//! so a missed or reordered backend update is corrected on the next call.
//!
//! ```text
//!   workloads (input order)
//!     ├─ bound + gated ──► node ready?  ──► WorkloadPatch{removeGate}
//!     │                    node stopped? ──► NodeAction{Start}
//!     └─ pending ────────► resolve ─► pick_best ─► [Start] + WorkloadPatch
//!   nodes
//!     └─ unneeded, running, idle ≥ cooldown ──► NodeAction{Stop}
//! ```

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use recluster_expr::Evaluator;
use recluster_placement::pick_best;
use recluster_policy::resolve;
use recluster_state::{RcNode, Snapshot, Workload};

use crate::action::{Action, WorkloadPatch, dedup};
use crate::error::{StepError, StepResult};

const DEFAULT_IDLE_COOLDOWN: Duration = Duration::from_secs(300);

/// Reason attached to every idle Stop.
pub const IDLE_REASON: &str = "idle timeout";

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Minimum time a running node must sit unneeded before it is stopped.
    pub idle_cooldown: Duration,
    /// Offset applied to `now` before matching schedule windows.
    pub utc_offset: FixedOffset,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            idle_cooldown: DEFAULT_IDLE_COOLDOWN,
            utc_offset: Utc.fix(),
        }
    }
}

/// Cancellation for a single step: an optional deadline and an optional
/// shutdown signal. Either one firing discards the whole plan.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    deadline: Option<Instant>,
    signal: Option<watch::Receiver<bool>>,
}

impl Cancel {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn check(&self) -> StepResult<()> {
        if self.signal.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(StepError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StepError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Per-policy resolution counts for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyTally {
    /// Pending workloads governed by this policy.
    pub matched: u32,
    /// Of those, workloads no node could take.
    pub rejected: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub tallies: BTreeMap<String, PolicyTally>,
    /// Pending workloads whose resolution failed.
    pub unresolved: u32,
}

/// Output of a successful step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub report: StepReport,
}

/// The lifecycle planner. Owns the expression cache; everything else is
/// read from the snapshot passed to [`Planner::step`].
#[derive(Debug, Default)]
pub struct Planner {
    eval: Evaluator,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            eval: Evaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.eval
    }

    /// Compute the deduplicated action list for `snapshot` at `now`.
    ///
    /// Cancellation is checked between workloads and once more before
    /// returning; a cancelled step yields an error and no actions.
    pub fn step(&self, snapshot: &Snapshot, now: DateTime<Utc>, cancel: &Cancel) -> StepResult<Plan> {
        // Expressions of edited or deleted policies age out after one step.
        self.eval.rotate();
        let local = now.with_timezone(&self.config.utc_offset).time();
        let mut actions = Vec::new();
        let mut report = StepReport::default();
        let mut needed: HashSet<&str> = HashSet::new();

        for workload in &snapshot.workloads {
            cancel.check()?;

            if let Some(target) = workload.target_node() {
                needed.insert(target);
                if workload.has_gate() {
                    self.follow_binding(snapshot, workload, target, now, &mut actions);
                }
                continue;
            }
            if !workload.is_pending() {
                continue;
            }

            let key = workload.table_key();
            let resolution = match resolve(workload, &snapshot.policies) {
                Ok(r) => r,
                Err(e) => {
                    warn!(workload = %key, reason = %e.reason(), error = %e, "policy resolution failed");
                    report.unresolved += 1;
                    continue;
                }
            };
            let Some(policy) = resolution.policy else {
                debug!(workload = %key, reason = %resolution.reason, "workload opted out of placement");
                continue;
            };

            let tally = report.tallies.entry(policy.name().to_string()).or_default();
            tally.matched += 1;
            let Some(best) = pick_best(&self.eval, policy, &snapshot.nodes, local) else {
                tally.rejected += 1;
                debug!(workload = %key, policy = %policy.name(), "no node fits; retrying next step");
                continue;
            };

            let node = best.node;
            needed.insert(node.name());
            debug!(
                workload = %key,
                policy = %policy.name(),
                reason = %resolution.reason,
                node = %node.name(),
                score = best.score,
                "placement chosen"
            );
            if needs_start(node) {
                actions.push(Action::start(node.name(), ready_at(now, node), "placement"));
            }
            actions.push(Action::Workload(WorkloadPatch::bind(
                workload.reference(),
                node.name(),
                node.is_ready(),
            )));
        }

        cancel.check()?;
        let cooldown = TimeDelta::from_std(self.config.idle_cooldown).unwrap_or(TimeDelta::MAX);
        for node in &snapshot.nodes {
            if needed.contains(node.name()) || !node.wants_running() || node.is_booting() {
                continue;
            }
            let idle_for = node.status.last_transition.map(|lt| now - lt);
            if idle_for.is_none_or(|idle| idle >= cooldown) {
                actions.push(Action::stop(node.name(), IDLE_REASON));
            } else {
                debug!(node = %node.name(), "unneeded but within idle cooldown");
            }
        }

        let actions = dedup(actions);
        cancel.check()?;
        if !actions.is_empty() {
            info!(actions = actions.len(), "planning step produced actions");
        }
        Ok(Plan { actions, report })
    }

    /// A gated workload already bound to `target`: release the gate once
    /// the node is ready, or restart the node if it has been stopped.
    fn follow_binding(
        &self,
        snapshot: &Snapshot,
        workload: &Workload,
        target: &str,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let Some(node) = snapshot.node(target) else {
            warn!(workload = %workload.table_key(), node = %target, "workload bound to unknown node");
            return;
        };
        if node.is_ready() {
            actions.push(Action::Workload(WorkloadPatch::bind(workload.reference(), target, true)));
        } else if needs_start(node) {
            actions.push(Action::start(target, ready_at(now, node), "bound workload waiting"));
        }
    }
}

fn needs_start(node: &RcNode) -> bool {
    !node.wants_running() && !node.is_booting()
}

fn ready_at(now: DateTime<Utc>, node: &RcNode) -> DateTime<Utc> {
    i64::try_from(node.spec.boot_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|boot| now.checked_add_signed(boot))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NodeActionKind;
    use crate::fixtures::*;
    use recluster_state::{DesiredState, NodeState, keys};

    fn planner() -> Planner {
        Planner::new(PlannerConfig::default())
    }

    fn node_actions(plan: &Plan) -> Vec<(String, NodeActionKind)> {
        plan.actions
            .iter()
            .filter_map(Action::as_node)
            .map(|a| (a.node.clone(), a.kind))
            .collect()
    }

    fn patches(plan: &Plan) -> Vec<&WorkloadPatch> {
        plan.actions.iter().filter_map(Action::as_workload).collect()
    }

    #[test]
    fn pending_workload_starts_cheapest_node() {
        let snap = Snapshot::new(
            vec![pending("api")],
            vec![tiny(), fat()],
            vec![default_policy("green", "ram >= 4")],
        );
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();

        assert_eq!(node_actions(&plan), vec![("tiny".to_string(), NodeActionKind::Start)]);
        let start = plan.actions[0].as_node().unwrap();
        assert_eq!(start.ready_at, Some(noon() + TimeDelta::seconds(30)));

        let patch = patches(&plan)[0];
        assert_eq!(patch.target_node(), Some("tiny"));
        assert!(!patch.remove_gate);
        assert_eq!(plan.report.tallies["green"], PolicyTally { matched: 1, rejected: 0 });
    }

    #[test]
    fn ready_node_gets_gate_removed_without_start() {
        let snap = Snapshot::new(
            vec![pending("api")],
            vec![running(tiny(), noon()), fat()],
            vec![default_policy("green", "ram >= 4")],
        );
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert!(node_actions(&plan).is_empty());
        assert!(patches(&plan)[0].remove_gate);
    }

    #[test]
    fn one_start_per_node_per_step() {
        let snap = Snapshot::new(
            vec![pending("a"), pending("b"), pending("c")],
            vec![tiny(), fat()],
            vec![default_policy("green", "ram >= 4")],
        );
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(node_actions(&plan).len(), 1);
        let names: Vec<_> = patches(&plan).iter().map(|p| p.workload.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn booting_node_gets_no_second_start_or_stop() {
        let mut booting = tiny();
        booting.spec.desired_state = DesiredState::Running;
        booting.status.state = NodeState::Booting;
        booting.status.last_transition = Some(noon() - TimeDelta::hours(2));

        let snap = Snapshot::new(vec![pending("api")], vec![booting.clone(), fat()], vec![default_policy("green", "ram >= 4")]);
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert!(node_actions(&plan).is_empty());
        assert!(!patches(&plan)[0].remove_gate);

        let idle = Snapshot::new(vec![], vec![booting], vec![]);
        let plan = planner().step(&idle, noon(), &Cancel::none()).unwrap();
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn idle_node_stopped_after_cooldown() {
        let snap = Snapshot::new(vec![], vec![running(tiny(), noon() - TimeDelta::minutes(5))], vec![]);
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        let stop = plan.actions[0].as_node().unwrap();
        assert_eq!(stop.kind, NodeActionKind::Stop);
        assert_eq!(stop.reason, IDLE_REASON);
    }

    #[test]
    fn idle_node_within_cooldown_untouched() {
        let snap = Snapshot::new(vec![], vec![running(tiny(), noon() - TimeDelta::minutes(4))], vec![]);
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn stopped_nodes_are_not_stopped_again() {
        let mut off = tiny();
        off.spec.desired_state = DesiredState::Stopped;
        off.status.state = NodeState::Inactive;
        let snap = Snapshot::new(vec![], vec![off, fat()], vec![]);
        assert!(planner().step(&snap, noon(), &Cancel::none()).unwrap().actions.is_empty());
    }

    #[test]
    fn bound_workload_keeps_node_alive_and_releases_gate() {
        let long_ago = noon() - TimeDelta::hours(1);
        let snap = Snapshot::new(
            vec![bound("api", "tiny", true), bound("web", "fat", false)],
            vec![running(tiny(), long_ago), running(fat(), long_ago)],
            vec![],
        );
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert!(node_actions(&plan).is_empty());
        let released = patches(&plan);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].workload.name, "api");
        assert!(released[0].remove_gate);
    }

    #[test]
    fn bound_workload_restarts_stopped_target() {
        let mut off = fat();
        off.spec.desired_state = DesiredState::Stopped;
        off.status.state = NodeState::Inactive;
        let snap = Snapshot::new(vec![bound("api", "fat", true)], vec![off], vec![]);
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(node_actions(&plan), vec![("fat".to_string(), NodeActionKind::Start)]);
        assert!(patches(&plan).is_empty());
    }

    #[test]
    fn no_fit_is_counted_as_rejected() {
        let snap = Snapshot::new(
            vec![pending("api")],
            vec![tiny(), fat()],
            vec![default_policy("huge", "ram >= 40")],
        );
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert!(plan.actions.is_empty());
        assert_eq!(plan.report.tallies["huge"], PolicyTally { matched: 1, rejected: 1 });
    }

    #[test]
    fn unresolved_and_skipped_workloads_stay_gated() {
        let mut named = pending("named");
        named
            .metadata
            .annotations
            .insert(keys::POLICY_NAME.to_string(), "missing".to_string());
        let mut skipped = pending("skipped");
        skipped
            .metadata
            .annotations
            .insert(keys::POLICY_SKIP.to_string(), "true".to_string());

        let snap = Snapshot::new(vec![named, skipped], vec![tiny()], vec![default_policy("green", "ram >= 4")]);
        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(plan.report.unresolved, 1);
        // tiny is desired Unset, so nothing to stop either.
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn repeated_steps_are_identical() {
        let snap = Snapshot::new(
            vec![pending("a"), bound("b", "fat", true), pending("c")],
            vec![tiny(), running(fat(), noon()), running(medium(), noon() - TimeDelta::hours(1))],
            vec![default_policy("green", "ram >= 4")],
        );
        let p = planner();
        let first = p.step(&snap, noon(), &Cancel::none()).unwrap();
        let second = p.step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            node_actions(&first),
            vec![
                ("tiny".to_string(), NodeActionKind::Start),
                ("medium".to_string(), NodeActionKind::Stop),
            ]
        );
    }

    #[test]
    fn cancelled_step_returns_no_plan() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let snap = Snapshot::new(vec![pending("api")], vec![tiny()], vec![default_policy("green", "true")]);
        let err = planner()
            .step(&snap, noon(), &Cancel::none().with_signal(rx))
            .unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
    }

    #[test]
    fn expired_deadline_returns_no_plan() {
        let snap = Snapshot::new(vec![], vec![running(tiny(), noon() - TimeDelta::hours(1))], vec![]);
        let cancel = Cancel::none().with_deadline(Instant::now());
        let err = planner().step(&snap, noon(), &cancel).unwrap_err();
        assert!(matches!(err, StepError::DeadlineExceeded));
    }

    #[test]
    fn schedule_uses_configured_offset() {
        use recluster_state::{MetricAdjustment, PolicyScheduleEntry};

        // At night a large negative cpu weight favours more cores.
        let mut policy = default_policy("green", "ram >= 4");
        policy.spec.schedule.push(PolicyScheduleEntry {
            name: "night".to_string(),
            start: "22:00".to_string(),
            end: "06:00".to_string(),
            adjustments: vec![MetricAdjustment {
                key: "cpu".to_string(),
                replace: Some(-100.0),
                multiply: None,
            }],
        });
        let snap = Snapshot::new(vec![pending("api")], vec![tiny(), fat()], vec![policy]);

        // 12:00 UTC is 23:00 at +11:00.
        let config = PlannerConfig {
            utc_offset: FixedOffset::east_opt(11 * 3600).unwrap(),
            ..Default::default()
        };
        let plan = Planner::new(config).step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(patches(&plan)[0].target_node(), Some("fat"));

        let plan = planner().step(&snap, noon(), &Cancel::none()).unwrap();
        assert_eq!(patches(&plan)[0].target_node(), Some("tiny"));
    }
}
