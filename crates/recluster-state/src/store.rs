//! StateStore — redb-backed persistence for Recluster documents.
//!
//! Provides typed CRUD over nodes, policies, and workloads. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::snapshot::{Snapshot, StateProvider, sort_policies};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type DocTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic document access ───────────────────────────────────

    fn put_doc<T: Serialize>(&self, def: DocTable, key: &str, doc: &T) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_doc<T: DeserializeOwned>(&self, def: DocTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn list_docs<T: DeserializeOwned>(&self, def: DocTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        list_in(&txn, def)
    }

    fn delete_doc(&self, def: DocTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a single document inside one write transaction.
    /// Returns the updated document, or `None` if the key was absent.
    fn update_doc<T, F>(&self, def: DocTable, key: &str, apply: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(guard.value().to_vec()),
                None => None,
            };
            updated = match current {
                Some(bytes) => {
                    let mut doc: T =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    apply(&mut doc);
                    let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
                    table
                        .insert(key, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(doc)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update an RcNode.
    pub fn put_node(&self, node: &RcNode) -> StateResult<()> {
        let key = node.table_key();
        self.put_doc(NODES, &key, node)?;
        debug!(%key, "node stored");
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> StateResult<Option<RcNode>> {
        self.get_doc(NODES, name)
    }

    pub fn list_nodes(&self) -> StateResult<Vec<RcNode>> {
        self.list_docs(NODES)
    }

    /// Delete a node by name. Returns true if it existed.
    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_doc(NODES, name)?;
        debug!(%name, existed, "node deleted");
        Ok(existed)
    }

    /// Atomically modify a node. Errors with `NotFound` if it is absent.
    pub fn update_node<F>(&self, name: &str, apply: F) -> StateResult<RcNode>
    where
        F: FnOnce(&mut RcNode),
    {
        self.update_doc(NODES, name, apply)?
            .ok_or_else(|| StateError::NotFound(format!("rcnode {name}")))
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or update an RcPolicy.
    pub fn put_policy(&self, policy: &RcPolicy) -> StateResult<()> {
        let key = policy.table_key();
        self.put_doc(POLICIES, &key, policy)?;
        debug!(%key, "policy stored");
        Ok(())
    }

    pub fn get_policy(&self, name: &str) -> StateResult<Option<RcPolicy>> {
        self.get_doc(POLICIES, name)
    }

    /// List policies ordered by creation time, then name.
    pub fn list_policies(&self) -> StateResult<Vec<RcPolicy>> {
        let mut policies: Vec<RcPolicy> = self.list_docs(POLICIES)?;
        sort_policies(&mut policies);
        Ok(policies)
    }

    pub fn delete_policy(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_doc(POLICIES, name)?;
        debug!(%name, existed, "policy deleted");
        Ok(existed)
    }

    /// Atomically modify a policy's status. Errors with `NotFound` if the
    /// policy is absent.
    pub fn update_policy_status<F>(&self, name: &str, apply: F) -> StateResult<RcPolicy>
    where
        F: FnOnce(&mut RcPolicyStatus),
    {
        self.update_doc(POLICIES, name, |p: &mut RcPolicy| apply(&mut p.status))?
            .ok_or_else(|| StateError::NotFound(format!("rcpolicy {name}")))
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        let key = workload.table_key();
        self.put_doc(WORKLOADS, &key, workload)?;
        debug!(%key, "workload stored");
        Ok(())
    }

    /// Get a workload by `{namespace}/{name}` key.
    pub fn get_workload(&self, key: &str) -> StateResult<Option<Workload>> {
        self.get_doc(WORKLOADS, key)
    }

    pub fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.list_docs(WORKLOADS)
    }

    pub fn delete_workload(&self, key: &str) -> StateResult<bool> {
        let existed = self.delete_doc(WORKLOADS, key)?;
        debug!(%key, existed, "workload deleted");
        Ok(existed)
    }

    /// Atomically modify a workload. Errors with `NotFound` if it is absent.
    pub fn update_workload<F>(&self, key: &str, apply: F) -> StateResult<Workload>
    where
        F: FnOnce(&mut Workload),
    {
        self.update_doc(WORKLOADS, key, apply)?
            .ok_or_else(|| StateError::NotFound(format!("workload {key}")))
    }
}

fn list_in<T: DeserializeOwned>(txn: &ReadTransaction, def: DocTable) -> StateResult<Vec<T>> {
    let table = txn.open_table(def).map_err(map_err!(Table))?;
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let doc: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(doc);
    }
    Ok(results)
}

impl StateProvider for StateStore {
    /// Read all three tables inside a single read transaction.
    fn snapshot(&self) -> StateResult<Snapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let workloads = list_in(&txn, WORKLOADS)?;
        let nodes = list_in(&txn, NODES)?;
        let policies = list_in(&txn, POLICIES)?;
        Ok(Snapshot::new(workloads, nodes, policies))
    }

    fn record_resolution(
        &self,
        policy: &str,
        matched: u32,
        rejected: u32,
        at: DateTime<Utc>,
    ) -> StateResult<()> {
        match self.update_policy_status(policy, |status| {
            status.matched_pods = matched;
            status.rejected_pods = rejected;
            status.last_resolved = Some(at);
        }) {
            Ok(_) => Ok(()),
            // Deleted since the snapshot was taken.
            Err(StateError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
