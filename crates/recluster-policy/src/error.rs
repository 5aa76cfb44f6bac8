//! Resolution failures.

use thiserror::Error;

use crate::reason::ResolutionReason;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("workload {workload} requests policy {policy:?} but it does not exist")]
    NameNotFound { workload: String, policy: String },

    #[error("no policy matches workload {workload}")]
    NoneFound { workload: String },

    #[error("policy {policy:?} has an invalid selector: {detail}")]
    InvalidSelector { policy: String, detail: String },
}

impl ResolveError {
    pub fn reason(&self) -> ResolutionReason {
        match self {
            ResolveError::NameNotFound { .. } => ResolutionReason::NameNotFound,
            ResolveError::NoneFound { .. } => ResolutionReason::NoPolicyFound,
            ResolveError::InvalidSelector { .. } => ResolutionReason::InvalidSelector,
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
