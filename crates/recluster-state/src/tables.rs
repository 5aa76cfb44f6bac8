//! redb table definitions for the Recluster state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized documents).

use redb::TableDefinition;

/// RcNode documents keyed by `{name}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("rcnodes");

/// RcPolicy documents keyed by `{name}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("rcpolicies");

/// Workload documents keyed by `{namespace}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");
