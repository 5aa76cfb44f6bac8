//! Controller loop: snapshot → plan → apply, on a fixed interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use recluster_state::StateProvider;

use crate::executor::Backend;
use crate::planner::{Cancel, Plan, Planner};
use crate::error::StepResult;

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub planned: usize,
    pub applied: usize,
    pub failed: usize,
}

pub struct Controller {
    provider: Arc<dyn StateProvider>,
    backend: Box<dyn Backend>,
    planner: Planner,
    step_deadline: Option<Duration>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Controller {
    pub fn new(provider: Arc<dyn StateProvider>, backend: Box<dyn Backend>, planner: Planner) -> Self {
        Self {
            provider,
            backend,
            planner,
            step_deadline: None,
            shutdown: None,
        }
    }

    /// Discard any step that runs longer than `deadline`.
    pub fn with_step_deadline(mut self, deadline: Duration) -> Self {
        self.step_deadline = Some(deadline);
        self
    }

    fn cancel(&self) -> Cancel {
        let mut cancel = Cancel::none();
        if let Some(d) = self.step_deadline {
            cancel = cancel.with_deadline(Instant::now() + d);
        }
        if let Some(rx) = &self.shutdown {
            cancel = cancel.with_signal(rx.clone());
        }
        cancel
    }

    /// Plan against the provider's current snapshot without applying.
    pub fn plan_at(&self, now: DateTime<Utc>) -> StepResult<Plan> {
        let snapshot = self.provider.snapshot()?;
        self.planner.step(&snapshot, now, &self.cancel())
    }

    /// One full iteration at `now`.
    ///
    /// Backend failures are logged per action and never abort the tick;
    /// only snapshot or cancellation failures return an error.
    pub fn tick_at(&self, now: DateTime<Utc>) -> StepResult<TickSummary> {
        if let Err(e) = self.backend.reconcile(now) {
            warn!(error = %e, "backend reconcile failed");
        }

        let snapshot = self.provider.snapshot()?;
        let plan = self.planner.step(&snapshot, now, &self.cancel())?;

        let mut summary = TickSummary {
            planned: plan.actions.len(),
            ..Default::default()
        };
        for action in &plan.actions {
            match self.backend.apply(action, now) {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(error = %e, ?action, "action failed");
                }
            }
        }

        for policy in &snapshot.policies {
            let tally = plan.report.tallies.get(policy.name()).copied().unwrap_or_default();
            if let Err(e) = self
                .provider
                .record_resolution(policy.name(), tally.matched, tally.rejected, now)
            {
                warn!(policy = %policy.name(), error = %e, "failed to record policy status");
            }
        }

        debug!(
            planned = summary.planned,
            applied = summary.applied,
            failed = summary.failed,
            unresolved = plan.report.unresolved,
            "tick complete"
        );
        Ok(summary)
    }

    pub fn tick(&self) -> StepResult<TickSummary> {
        self.tick_at(Utc::now())
    }

    /// Run ticks every `interval` until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        self.shutdown = Some(shutdown.clone());
        info!(interval_ms = interval.as_millis() as u64, "controller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick() {
                        error!(error = %e, "planning step failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::error::{BackendResult, StepError};
    use crate::executor::StoreBackend;
    use crate::fixtures::*;
    use chrono::TimeDelta;
    use recluster_state::{Snapshot, StateStore};
    use std::sync::Mutex;

    fn seeded() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&tiny()).unwrap();
        store.put_node(&fat()).unwrap();
        store.put_policy(&default_policy("green", "ram >= 4")).unwrap();
        store.put_workload(&pending("api")).unwrap();
        store
    }

    fn controller(store: &StateStore) -> Controller {
        Controller::new(
            Arc::new(store.clone()),
            Box::new(StoreBackend::new(store.clone())),
            Planner::default(),
        )
    }

    #[test]
    fn tick_boots_node_and_later_releases_gate() {
        let store = seeded();
        let ctl = controller(&store);

        let first = ctl.tick_at(noon()).unwrap();
        assert_eq!(first.planned, 2);
        assert_eq!(first.applied, 2);
        let w = store.get_workload("prod/api").unwrap().unwrap();
        assert_eq!(w.target_node(), Some("tiny"));
        assert!(w.has_gate());

        let policy = store.get_policy("green").unwrap().unwrap();
        assert_eq!(policy.status.matched_pods, 1);
        assert_eq!(policy.status.last_resolved, Some(noon()));

        // Still booting: nothing to do.
        let mid = ctl.tick_at(noon() + TimeDelta::seconds(10)).unwrap();
        assert_eq!(mid.planned, 0);

        let done = ctl.tick_at(noon() + TimeDelta::seconds(30)).unwrap();
        assert_eq!(done.applied, 1);
        assert!(!store.get_workload("prod/api").unwrap().unwrap().has_gate());

        let policy = store.get_policy("green").unwrap().unwrap();
        assert_eq!(policy.status.matched_pods, 0);
    }

    #[test]
    fn edited_constraints_do_not_accumulate_in_the_cache() {
        let store = seeded();
        let ctl = Controller::new(
            Arc::new(store.clone()),
            Box::new(crate::executor::DryRunBackend),
            Planner::default(),
        );

        for gib in 1..=20 {
            store
                .put_policy(&default_policy("green", &format!("ram >= {gib}")))
                .unwrap();
            ctl.tick_at(noon() + TimeDelta::minutes(gib)).unwrap();
            assert!(ctl.planner.evaluator().cached() <= 2, "after {gib} edits");
        }
    }

    struct Failing;

    impl Backend for Failing {
        fn apply(&self, action: &Action, _now: DateTime<Utc>) -> BackendResult<()> {
            Err(crate::error::BackendError::UnknownNode(
                action.as_node().map(|a| a.node.clone()).unwrap_or_default(),
            ))
        }
    }

    #[test]
    fn backend_failures_are_not_fatal() {
        let store = seeded();
        let ctl = Controller::new(Arc::new(store.clone()), Box::new(Failing), Planner::default());
        let summary = ctl.tick_at(noon()).unwrap();
        assert_eq!(summary, TickSummary { planned: 2, applied: 0, failed: 2 });
    }

    struct Unavailable;

    impl StateProvider for Unavailable {
        fn snapshot(&self) -> recluster_state::StateResult<Snapshot> {
            Err(recluster_state::StateError::Read("cache not synced".to_string()))
        }
    }

    struct Recording(Mutex<Vec<String>>);

    impl Backend for Recording {
        fn apply(&self, action: &Action, _now: DateTime<Utc>) -> BackendResult<()> {
            self.0.lock().unwrap().push(format!("{action:?}"));
            Ok(())
        }
    }

    #[test]
    fn snapshot_failure_applies_nothing() {
        let ctl = Controller::new(
            Arc::new(Unavailable),
            Box::new(Recording(Mutex::new(Vec::new()))),
            Planner::default(),
        );
        assert!(matches!(ctl.tick_at(noon()), Err(StepError::Snapshot(_))));
    }

    #[test]
    fn plan_at_reads_a_fixed_snapshot() {
        let snap = Snapshot::new(vec![pending("api")], vec![tiny(), fat()], vec![default_policy("green", "ram >= 4")]);
        let ctl = Controller::new(Arc::new(snap), Box::new(crate::executor::DryRunBackend), Planner::default());
        let plan = ctl.plan_at(noon()).unwrap();
        assert_eq!(plan.actions.len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = seeded();
        let mut ctl = controller(&store);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            ctl.run(Duration::from_millis(10), rx).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let w = store.get_workload("prod/api").unwrap().unwrap();
        assert_eq!(w.target_node(), Some("tiny"));
    }
}
