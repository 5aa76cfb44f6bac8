//! Why a workload ended up with (or without) a policy.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionReason {
    SkipAnnotation,
    ExactName,
    SelectorMatch,
    ClusterDefault,
    NoPolicyFound,
    NameNotFound,
    InvalidSelector,
}

impl ResolutionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionReason::SkipAnnotation => "skip-annotation",
            ResolutionReason::ExactName => "exact-name",
            ResolutionReason::SelectorMatch => "selector-match",
            ResolutionReason::ClusterDefault => "cluster-default",
            ResolutionReason::NoPolicyFound => "no-policy-found",
            ResolutionReason::NameNotFound => "name-not-found",
            ResolutionReason::InvalidSelector => "invalid-selector",
        }
    }
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
