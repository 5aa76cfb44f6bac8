//! Recluster node scorer.
//!
//! Given a resolved policy and the known nodes, picks the node a workload
//! should land on. Scoring is a greedy, single-pass minimisation; nothing is
//! persisted between calls.
//!
//! # Components
//!
//! - **`weights`** — Effective metric weights (schedule windows, external feeds)
//! - **`source`** — Raw metric values (built-ins, jsonPath, fieldPath)
//! - **`scorer`** — Hard-constraint filtering and `pick_best`

pub mod scorer;
pub mod source;
pub mod weights;

pub use scorer::{Candidate, node_bindings, pick_best, score_nodes};
pub use source::MetricError;
pub use weights::{active_window, effective_weights};
