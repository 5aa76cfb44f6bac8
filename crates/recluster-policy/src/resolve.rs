//! Policy resolution precedence.
//!
//! ```text
//!   1. skip annotation == "true"   -> no policy        (skip-annotation)
//!   2. policy-name annotation      -> that policy      (exact-name)
//!                                     or error         (name-not-found)
//!   3. first selector match        -> in input order   (selector-match)
//!   4. oldest nil-selector policy  ->                  (cluster-default)
//!   5. nothing                     -> error            (no-policy-found)
//! ```
//!
//! Exactly one policy governs a workload; matches are never merged.

use tracing::warn;

use recluster_state::{RcPolicy, Workload, keys};

use crate::error::{ResolveError, ResolveResult};
use crate::reason::ResolutionReason;
use crate::selector::Selector;

/// Outcome of a successful resolution. `policy` is `None` only for
/// [`ResolutionReason::SkipAnnotation`].
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub policy: Option<&'a RcPolicy>,
    pub reason: ResolutionReason,
}

/// Resolve the governing policy for `workload`.
///
/// `policies` should be in a stable order (creation time); selector matches
/// are taken in that order. Every non-nil selector is validated before
/// matching, so one broken policy is surfaced even when an earlier policy
/// would have matched.
pub fn resolve<'a>(workload: &Workload, policies: &'a [RcPolicy]) -> ResolveResult<Resolution<'a>> {
    let annotations = &workload.metadata.annotations;

    if annotations.get(keys::POLICY_SKIP).map(String::as_str) == Some("true") {
        return Ok(Resolution {
            policy: None,
            reason: ResolutionReason::SkipAnnotation,
        });
    }

    if let Some(name) = annotations.get(keys::POLICY_NAME) {
        return match policies.iter().find(|p| &p.metadata.name == name) {
            Some(policy) => Ok(Resolution {
                policy: Some(policy),
                reason: ResolutionReason::ExactName,
            }),
            None => Err(ResolveError::NameNotFound {
                workload: workload.table_key(),
                policy: name.clone(),
            }),
        };
    }

    let mut compiled = Vec::with_capacity(policies.len());
    for policy in policies {
        if let Some(selector) = &policy.spec.selector {
            let selector = Selector::compile(selector).map_err(|detail| {
                warn!(policy = %policy.metadata.name, %detail, "invalid policy selector");
                ResolveError::InvalidSelector {
                    policy: policy.metadata.name.clone(),
                    detail,
                }
            })?;
            compiled.push((policy, selector));
        }
    }

    if let Some((policy, _)) = compiled
        .iter()
        .find(|(_, sel)| sel.matches(&workload.metadata.labels))
    {
        return Ok(Resolution {
            policy: Some(*policy),
            reason: ResolutionReason::SelectorMatch,
        });
    }

    // min_by_key keeps the first of equal keys; undated policies sort first.
    let default = policies
        .iter()
        .filter(|p| p.spec.selector.is_none())
        .min_by_key(|p| p.metadata.creation_timestamp);
    if let Some(policy) = default {
        return Ok(Resolution {
            policy: Some(policy),
            reason: ResolutionReason::ClusterDefault,
        });
    }

    Err(ResolveError::NoneFound {
        workload: workload.table_key(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recluster_state::{LabelSelector, LabelSelectorRequirement, ObjectMeta, RcPolicySpec};

    fn policy(name: &str, created: i64, selector: Option<LabelSelector>) -> RcPolicy {
        RcPolicy {
            metadata: ObjectMeta {
                name: name.to_string(),
                creation_timestamp: Some(Utc.timestamp_opt(created, 0).unwrap()),
                ..Default::default()
            },
            spec: RcPolicySpec {
                selector,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn match_labels(pairs: &[(&str, &str)]) -> Option<LabelSelector> {
        Some(LabelSelector {
            match_labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        })
    }

    fn workload(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Workload {
        let mut w = Workload {
            metadata: ObjectMeta {
                name: "api".to_string(),
                namespace: "prod".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        for (k, v) in labels {
            w.metadata.labels.insert(k.to_string(), v.to_string());
        }
        for (k, v) in annotations {
            w.metadata.annotations.insert(k.to_string(), v.to_string());
        }
        w
    }

    #[test]
    fn skip_wins_over_everything() {
        let policies = vec![
            policy("green", 1, match_labels(&[("app", "api")])),
            policy("default", 2, None),
        ];
        let w = workload(
            &[("app", "api")],
            &[(keys::POLICY_SKIP, "true"), (keys::POLICY_NAME, "green")],
        );
        let r = resolve(&w, &policies).unwrap();
        assert!(r.policy.is_none());
        assert_eq!(r.reason, ResolutionReason::SkipAnnotation);
    }

    #[test]
    fn skip_requires_literal_true() {
        let policies = vec![policy("default", 1, None)];
        let w = workload(&[], &[(keys::POLICY_SKIP, "yes")]);
        let r = resolve(&w, &policies).unwrap();
        assert_eq!(r.reason, ResolutionReason::ClusterDefault);
    }

    #[test]
    fn exact_name_beats_selector() {
        let policies = vec![
            policy("green", 1, match_labels(&[("app", "api")])),
            policy("fast", 2, match_labels(&[("app", "other")])),
        ];
        let w = workload(&[("app", "api")], &[(keys::POLICY_NAME, "fast")]);
        let r = resolve(&w, &policies).unwrap();
        assert_eq!(r.policy.unwrap().name(), "fast");
        assert_eq!(r.reason, ResolutionReason::ExactName);
    }

    #[test]
    fn missing_named_policy_never_falls_through() {
        let policies = vec![
            policy("green", 1, match_labels(&[("app", "api")])),
            policy("default", 2, None),
        ];
        let w = workload(&[("app", "api")], &[(keys::POLICY_NAME, "ghost")]);
        let err = resolve(&w, &policies).unwrap_err();
        assert_eq!(err.reason(), ResolutionReason::NameNotFound);
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn first_selector_match_in_input_order() {
        let policies = vec![
            policy("default", 0, None),
            policy("b", 5, match_labels(&[("app", "api")])),
            policy("a", 9, Some(LabelSelector::default())),
        ];
        let w = workload(&[("app", "api")], &[]);
        let r = resolve(&w, &policies).unwrap();
        assert_eq!(r.policy.unwrap().name(), "b");
        assert_eq!(r.reason, ResolutionReason::SelectorMatch);
    }

    #[test]
    fn nil_selector_is_default_not_match_all() {
        let policies = vec![
            policy("default", 0, None),
            policy("catch-all", 5, Some(LabelSelector::default())),
        ];
        let w = workload(&[("app", "api")], &[]);
        let r = resolve(&w, &policies).unwrap();
        assert_eq!(r.policy.unwrap().name(), "catch-all");
        assert_eq!(r.reason, ResolutionReason::SelectorMatch);
    }

    #[test]
    fn oldest_default_wins() {
        let policies = vec![
            policy("newer", 200, None),
            policy("older", 100, None),
            policy("other", 50, match_labels(&[("app", "web")])),
        ];
        let w = workload(&[("app", "api")], &[]);
        for _ in 0..3 {
            let r = resolve(&w, &policies).unwrap();
            assert_eq!(r.policy.unwrap().name(), "older");
            assert_eq!(r.reason, ResolutionReason::ClusterDefault);
        }
    }

    #[test]
    fn equal_default_timestamps_keep_input_order() {
        let policies = vec![policy("first", 100, None), policy("second", 100, None)];
        let r = resolve(&workload(&[], &[]), &policies).unwrap();
        assert_eq!(r.policy.unwrap().name(), "first");
    }

    #[test]
    fn nothing_matches() {
        let policies = vec![policy("web", 1, match_labels(&[("app", "web")]))];
        let err = resolve(&workload(&[("app", "api")], &[]), &policies).unwrap_err();
        assert_eq!(err.reason(), ResolutionReason::NoPolicyFound);

        let err = resolve(&workload(&[], &[]), &[]).unwrap_err();
        assert_eq!(err.reason(), ResolutionReason::NoPolicyFound);
    }

    #[test]
    fn malformed_selector_aborts() {
        let broken = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "Matches".to_string(),
                values: vec![],
            }],
            ..Default::default()
        };
        let policies = vec![
            policy("good", 1, match_labels(&[("app", "api")])),
            policy("broken", 2, Some(broken)),
        ];
        let err = resolve(&workload(&[("app", "api")], &[]), &policies).unwrap_err();
        assert_eq!(err.reason(), ResolutionReason::InvalidSelector);
        assert!(matches!(err, ResolveError::InvalidSelector { ref policy, .. } if policy == "broken"));
    }
}
