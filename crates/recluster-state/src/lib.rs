//! recluster-state — cluster documents and the embedded state store.
//!
//! Holds the three document kinds the controller reasons about (`RcNode`,
//! `RcPolicy`, `Workload`), their JSON wire shape, and a
//! [redb](https://docs.rs/redb)-backed `StateStore` that hands out
//! point-in-time [`Snapshot`]s to the planner.
//!
//! # Architecture
//!
//! All documents are JSON-serialized into redb's `&[u8]` value columns.
//! Nodes and policies are keyed by name, workloads by `{namespace}/{name}`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. A snapshot is read inside a single
//! read transaction, so the planner never observes a half-applied update.

pub mod error;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use snapshot::{Snapshot, StateProvider};
pub use store::StateStore;
pub use types::*;
