//! Planner and backend error types.

use thiserror::Error;

/// Fatal outcomes of a planning step. Every variant means zero actions.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("planning step cancelled")]
    Cancelled,

    #[error("planning step exceeded its deadline")]
    DeadlineExceeded,

    #[error("snapshot unavailable: {0}")]
    Snapshot(#[from] recluster_state::StateError),
}

/// Errors from applying an action.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("state store error: {0}")]
    State(#[from] recluster_state::StateError),
}

pub type StepResult<T> = Result<T, StepError>;
pub type BackendResult<T> = Result<T, BackendError>;
