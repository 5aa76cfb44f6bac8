//! Point-in-time view of the cluster handed to the planner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::types::{RcNode, RcPolicy, Workload};

/// Consistent copy of every document the planner reads in one step.
///
/// Policies are ordered by creation time (oldest first, undated first),
/// ties broken by name. Nodes and workloads keep table order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub workloads: Vec<Workload>,
    #[serde(default)]
    pub nodes: Vec<RcNode>,
    #[serde(default)]
    pub policies: Vec<RcPolicy>,
}

impl Snapshot {
    pub fn new(workloads: Vec<Workload>, nodes: Vec<RcNode>, mut policies: Vec<RcPolicy>) -> Self {
        sort_policies(&mut policies);
        Self {
            workloads,
            nodes,
            policies,
        }
    }

    pub fn node(&self, name: &str) -> Option<&RcNode> {
        self.nodes.iter().find(|n| n.metadata.name == name)
    }
}

pub(crate) fn sort_policies(policies: &mut [RcPolicy]) {
    policies.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
}

/// Source of planner input and sink for per-policy resolution counts.
pub trait StateProvider: Send + Sync {
    fn snapshot(&self) -> StateResult<Snapshot>;

    /// Record how many workloads a policy matched and rejected in a step.
    fn record_resolution(
        &self,
        _policy: &str,
        _matched: u32,
        _rejected: u32,
        _at: DateTime<Utc>,
    ) -> StateResult<()> {
        Ok(())
    }
}

/// A fixed snapshot is its own provider; used by `plan` dry runs and tests.
impl StateProvider for Snapshot {
    fn snapshot(&self) -> StateResult<Snapshot> {
        Ok(self.clone())
    }
}
