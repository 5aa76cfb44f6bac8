//! Node scoring for placement decisions.
//!
//! For each candidate node, in input order:
//! - **Hard constraints**: every boolean expression must hold. A false
//!   result, a compile error, or an evaluation error rejects the node.
//! - **Weighted metrics**: `Σ effective_weight_i * transform_i(value_i)`.
//!   A lookup or transform failure excludes that node only.
//!
//! Lower scores are better. NaN contributions count as `+∞`. Ties keep the
//! earliest node.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use tracing::{debug, warn};

use recluster_expr::{Bindings, Evaluator};
use recluster_state::{PolicyMetric, RcNode, RcPolicy};

use crate::source;
use crate::weights::effective_weights;

/// Variable bound to the raw metric value in metric transforms.
pub const TRANSFORM_VAR: &str = "x";

/// A node that passed every hard constraint, with its score.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub node: &'a RcNode,
    pub score: f64,
    /// Weighted contribution per metric key.
    pub detail: BTreeMap<String, f64>,
}

/// Bindings for hard constraints: `cpu` (cores), `ram` (GiB), `boot`
/// (seconds).
pub fn node_bindings(node: &RcNode) -> Bindings {
    Bindings::new()
        .with("cpu", f64::from(node.spec.cpu.cores))
        .with("ram", node.spec.memory_gib())
        .with("boot", node.spec.boot_seconds as f64)
}

fn satisfies_constraints(eval: &Evaluator, policy: &RcPolicy, node: &RcNode) -> bool {
    if policy.spec.hard_constraints.is_empty() {
        return true;
    }
    let vars = node_bindings(node);
    for constraint in &policy.spec.hard_constraints {
        let verdict = eval
            .compile(&constraint.expression)
            .map_err(|e| e.to_string())
            .and_then(|prog| prog.eval_bool(&vars).map_err(|e| e.to_string()));
        match verdict {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    node = %node.name(),
                    constraint = %constraint.expression,
                    "node rejected by hard constraint"
                );
                return false;
            }
            Err(error) => {
                warn!(
                    policy = %policy.name(),
                    node = %node.name(),
                    constraint = %constraint.expression,
                    %error,
                    "hard constraint failed; rejecting node"
                );
                return false;
            }
        }
    }
    true
}

fn metric_contribution(
    eval: &Evaluator,
    metric: &PolicyMetric,
    weight: f64,
    node: &RcNode,
    doc: Option<&serde_json::Value>,
) -> Result<f64, String> {
    let raw = source::raw_value(metric, node, doc).map_err(|e| e.to_string())?;
    let value = match &metric.transform {
        Some(transform) => {
            let prog = eval.compile(transform).map_err(|e| e.to_string())?;
            prog.eval_f64(&Bindings::new().with(TRANSFORM_VAR, raw))
                .map_err(|e| e.to_string())?
        }
        None => raw,
    };
    let contribution = value * weight;
    Ok(if contribution.is_nan() {
        f64::INFINITY
    } else {
        contribution
    })
}

/// Score every node that passes the hard constraints, in input order.
pub fn score_nodes<'a>(
    eval: &Evaluator,
    policy: &RcPolicy,
    nodes: &'a [RcNode],
    now: NaiveTime,
) -> Vec<Candidate<'a>> {
    let weights = effective_weights(eval, policy, now);
    let metrics = &policy.spec.metrics;
    let wants_document = metrics.iter().any(source::needs_document);

    let mut candidates = Vec::new();
    'nodes: for node in nodes {
        if !satisfies_constraints(eval, policy, node) {
            continue;
        }

        let doc = if wants_document {
            match source::node_document(node) {
                Ok(doc) => Some(doc),
                Err(error) => {
                    warn!(node = %node.name(), %error, "cannot render node document");
                    continue;
                }
            }
        } else {
            None
        };

        let mut score = 0.0;
        let mut detail = BTreeMap::new();
        for (metric, weight) in metrics.iter().zip(&weights) {
            match metric_contribution(eval, metric, *weight, node, doc.as_ref()) {
                Ok(contribution) => {
                    score += contribution;
                    *detail.entry(metric.key.clone()).or_insert(0.0) += contribution;
                }
                Err(error) => {
                    warn!(
                        policy = %policy.name(),
                        node = %node.name(),
                        metric = %metric.key,
                        %error,
                        "metric failed; excluding node"
                    );
                    continue 'nodes;
                }
            }
        }
        if score.is_nan() {
            score = f64::INFINITY;
        }

        debug!(node = %node.name(), score, "node scored");
        candidates.push(Candidate { node, score, detail });
    }
    candidates
}

/// The feasible node with the strictly lowest score, or `None` when no node
/// passes the hard constraints.
pub fn pick_best<'a>(
    eval: &Evaluator,
    policy: &RcPolicy,
    nodes: &'a [RcNode],
    now: NaiveTime,
) -> Option<Candidate<'a>> {
    let mut best: Option<Candidate<'a>> = None;
    for candidate in score_nodes(eval, policy, nodes, now) {
        if best.as_ref().is_none_or(|b| candidate.score < b.score) {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use recluster_state::{
        MetricAdjustment, ObjectMeta, PolicyConstraint, PolicyScheduleEntry,
        RcNodeCpuSpec, RcNodeSpec, RcPolicySpec,
    };

    const GIB: u64 = 1024 * 1024 * 1024;

    fn node(name: &str, cpu: u32, ram_gib: u64, boot: u64) -> RcNode {
        RcNode {
            metadata: ObjectMeta::named(name),
            spec: RcNodeSpec {
                cpu: RcNodeCpuSpec {
                    cores: cpu,
                    ..Default::default()
                },
                memory_bytes: ram_gib * GIB,
                boot_seconds: boot,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn policy(metrics: Vec<PolicyMetric>, constraints: &[&str]) -> RcPolicy {
        RcPolicy {
            metadata: ObjectMeta::named("p"),
            spec: RcPolicySpec {
                metrics,
                hard_constraints: constraints
                    .iter()
                    .map(|e| PolicyConstraint {
                        expression: e.to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn tiny_and_fat() -> Vec<RcNode> {
        vec![node("tiny", 2, 4, 30), node("fat", 8, 32, 90)]
    }

    fn boot_cpu() -> Vec<PolicyMetric> {
        vec![PolicyMetric::new("boot", 1.0), PolicyMetric::new("cpu", 0.2)]
    }

    #[test]
    fn tiny_beats_fat() {
        let eval = Evaluator::new();
        let nodes = tiny_and_fat();
        let p = policy(boot_cpu(), &["ram >= 4"]);

        let best = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "tiny");
        assert!((best.score - 30.4).abs() < 1e-9);
        assert!((best.detail["cpu"] - 0.4).abs() < 1e-9);

        let all = score_nodes(&eval, &p, &nodes, noon());
        assert!((all[1].score - 91.6).abs() < 1e-9);
    }

    #[test]
    fn no_node_fits() {
        let eval = Evaluator::new();
        let p = policy(boot_cpu(), &["ram >= 40"]);
        assert!(pick_best(&eval, &p, &tiny_and_fat(), noon()).is_none());
    }

    #[test]
    fn failing_constraint_excludes_lowest_scorer() {
        let eval = Evaluator::new();
        let p = policy(boot_cpu(), &["cpu >= 4"]);
        let nodes = tiny_and_fat();
        let best = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "fat");
    }

    #[test]
    fn constraint_errors_reject_only_that_node() {
        let eval = Evaluator::new();
        // Short-circuits on fat, errors (unknown variable) on tiny.
        let p = policy(boot_cpu(), &["cpu > 4 || gpu > 0"]);
        let nodes = tiny_and_fat();
        let best = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "fat");
    }

    #[test]
    fn malformed_constraint_rejects_everything() {
        let eval = Evaluator::new();
        let p = policy(boot_cpu(), &["ram >="]);
        assert!(pick_best(&eval, &p, &tiny_and_fat(), noon()).is_none());
    }

    #[test]
    fn negative_weight_maximises() {
        let eval = Evaluator::new();
        let p = policy(vec![PolicyMetric::new("ram", -1.0)], &[]);
        let nodes = tiny_and_fat();
        let best = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "fat");
    }

    #[test]
    fn ties_keep_first_node() {
        let eval = Evaluator::new();
        let nodes = vec![node("a", 4, 8, 60), node("b", 4, 8, 60)];
        let p = policy(boot_cpu(), &[]);
        assert_eq!(pick_best(&eval, &p, &nodes, noon()).unwrap().node.name(), "a");
    }

    #[test]
    fn transform_applied_before_weight() {
        let eval = Evaluator::new();
        let mut boot = PolicyMetric::new("boot", 1.0);
        boot.transform = Some("min(x, 40)".to_string());
        let p = policy(vec![boot, PolicyMetric::new("cpu", -1.0)], &[]);
        // tiny: 30 - 2 = 28; fat: 40 - 8 = 32.
        let nodes = tiny_and_fat();
        let best = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "tiny");
        assert_eq!(best.score, 28.0);
    }

    #[test]
    fn nan_contribution_is_worst() {
        let eval = Evaluator::new();
        let mut cpu = PolicyMetric::new("cpu", 1.0);
        // 0/0 on the first node only.
        cpu.transform = Some("(x - 2) / (x - 2)".to_string());
        let nodes = vec![node("nan", 2, 4, 1), node("ok", 8, 4, 1)];
        let p = policy(vec![cpu], &[]);

        let scored = score_nodes(&eval, &p, &nodes, noon());
        assert_eq!(scored[0].score, f64::INFINITY);
        assert_eq!(pick_best(&eval, &p, &nodes, noon()).unwrap().node.name(), "ok");
    }

    #[test]
    fn metric_failure_excludes_node_only() {
        let eval = Evaluator::new();
        let mut power = PolicyMetric::new("power", 1.0);
        power.selector = Some("$.metadata.labels.watts".to_string());
        let mut with_label = node("labelled", 8, 32, 90);
        with_label
            .metadata
            .labels
            .insert("watts".to_string(), "120".to_string());
        let nodes = vec![node("unlabelled", 2, 4, 30), with_label];
        let p = policy(vec![power], &[]);

        let scored = score_nodes(&eval, &p, &nodes, noon());
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].node.name(), "labelled");
        assert_eq!(scored[0].score, 120.0);
    }

    #[test]
    fn transform_type_error_excludes_node() {
        let eval = Evaluator::new();
        let mut cpu = PolicyMetric::new("cpu", 1.0);
        cpu.transform = Some("x > 4".to_string());
        let p = policy(vec![cpu], &[]);
        assert!(pick_best(&eval, &p, &tiny_and_fat(), noon()).is_none());
    }

    #[test]
    fn night_window_changes_winner() {
        let eval = Evaluator::new();
        // a: boot 10, cpu 40 -> day 10 + 8 = 18, night 10 + 24 = 34
        // b: boot 25, cpu 2  -> day 25 + 0.4 = 25.4, night 25 + 1.2 = 26.2
        let nodes = vec![node("a", 40, 4, 10), node("b", 2, 4, 25)];
        let mut p = policy(boot_cpu(), &[]);
        p.spec.schedule.push(PolicyScheduleEntry {
            name: "night".to_string(),
            start: "22:00".to_string(),
            end: "06:00".to_string(),
            adjustments: vec![MetricAdjustment {
                key: "cpu".to_string(),
                replace: None,
                multiply: Some(3.0),
            }],
        });

        let day = pick_best(&eval, &p, &nodes, noon()).unwrap();
        assert_eq!(day.node.name(), "a");
        let late = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let night = pick_best(&eval, &p, &nodes, late).unwrap();
        assert_eq!(night.node.name(), "b");
    }

    #[test]
    fn empty_inputs() {
        let eval = Evaluator::new();
        let p = policy(boot_cpu(), &[]);
        assert!(pick_best(&eval, &p, &[], noon()).is_none());

        let nodes = tiny_and_fat();
        let no_metrics = policy(vec![], &[]);
        let best = pick_best(&eval, &no_metrics, &nodes, noon()).unwrap();
        assert_eq!(best.node.name(), "tiny");
        assert_eq!(best.score, 0.0);
    }
}
