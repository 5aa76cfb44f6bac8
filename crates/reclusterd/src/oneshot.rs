//! One-shot subcommands: `plan` and `load`.

use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use recluster_core::config::parse_offset;
use recluster_core::parse_duration;
use recluster_planner::{Cancel, Planner, PlannerConfig};
use recluster_policy::admission;
use recluster_state::{Snapshot, StateStore};

use crate::daemon::DB_FILE;

fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let raw: Snapshot =
        serde_json::from_str(&content).with_context(|| format!("parsing snapshot {}", path.display()))?;
    // Re-sort policies into creation order.
    Ok(Snapshot::new(raw.workloads, raw.nodes, raw.policies))
}

/// Plan one step over the snapshot at `path`; returns the actions as
/// pretty-printed JSON.
pub fn plan(
    path: &Path,
    now: Option<&str>,
    idle_cooldown: Option<&str>,
    utc_offset: Option<&str>,
) -> anyhow::Result<String> {
    let snapshot = read_snapshot(path)?;
    let now = match now {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("--now must be RFC 3339: {raw:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let mut config = PlannerConfig::default();
    if let Some(raw) = idle_cooldown {
        config.idle_cooldown = parse_duration(raw).ok_or_else(|| anyhow!("invalid --idle-cooldown: {raw:?}"))?;
    }
    if let Some(raw) = utc_offset {
        config.utc_offset = parse_offset(raw)?;
    }

    let plan = Planner::new(config).step(&snapshot, now, &Cancel::none())?;
    if plan.report.unresolved > 0 {
        warn!(unresolved = plan.report.unresolved, "some workloads could not be resolved");
    }
    info!(%now, actions = plan.actions.len(), "plan computed");
    Ok(serde_json::to_string_pretty(&plan.actions)?)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub nodes: usize,
    pub policies: usize,
    pub workloads: usize,
    /// Workloads that received the placement gate on import.
    pub gated: usize,
}

/// Import every document in `file` into the store under `data_dir`.
/// Workloads go through the admission rule first.
pub fn load(data_dir: &Path, file: &Path) -> anyhow::Result<LoadSummary> {
    let snapshot = read_snapshot(file)?;
    std::fs::create_dir_all(data_dir)?;
    let store = StateStore::open(&data_dir.join(DB_FILE))?;

    let mut summary = LoadSummary::default();
    for node in &snapshot.nodes {
        store.put_node(node)?;
        summary.nodes += 1;
    }
    for policy in &snapshot.policies {
        store.put_policy(policy)?;
        summary.policies += 1;
    }
    for mut workload in snapshot.workloads {
        if admission::admit(&mut workload) {
            summary.gated += 1;
        }
        store.put_workload(&workload)?;
        summary.workloads += 1;
    }
    info!(path = %file.display(), ?summary, "documents loaded");
    Ok(summary)
}
