//! Kubernetes-style label selectors.
//!
//! `matchLabels` and `matchExpressions` are ANDed. An empty selector matches
//! everything; whether a *missing* selector means "default" is the
//! resolver's decision, not this module's.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use recluster_state::{LabelSelector, LabelSelectorRequirement};

/// `[prefix/]name`, where name is a DNS-1123-ish label segment.
static LABEL_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$"));

static DNS_SUBDOMAIN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
});

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq)]
struct Requirement {
    key: String,
    op: Operator,
    values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.op {
            Operator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A validated selector ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Validate and compile. Errors carry a human-readable detail.
    pub fn compile(selector: &LabelSelector) -> Result<Self, String> {
        let mut requirements = Vec::new();

        for (key, value) in &selector.match_labels {
            validate_key(key)?;
            validate_value(value)?;
            requirements.push(Requirement {
                key: key.clone(),
                op: Operator::In,
                values: vec![value.clone()],
            });
        }
        for expr in &selector.match_expressions {
            requirements.push(compile_expression(expr)?);
        }

        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

fn compile_expression(expr: &LabelSelectorRequirement) -> Result<Requirement, String> {
    validate_key(&expr.key)?;
    let op = match expr.operator.as_str() {
        "In" => Operator::In,
        "NotIn" => Operator::NotIn,
        "Exists" => Operator::Exists,
        "DoesNotExist" => Operator::DoesNotExist,
        other => return Err(format!("unknown operator {other:?} for key {:?}", expr.key)),
    };
    match op {
        Operator::In | Operator::NotIn if expr.values.is_empty() => {
            return Err(format!(
                "operator {} for key {:?} needs at least one value",
                expr.operator, expr.key
            ));
        }
        Operator::Exists | Operator::DoesNotExist if !expr.values.is_empty() => {
            return Err(format!(
                "operator {} for key {:?} takes no values",
                expr.operator, expr.key
            ));
        }
        _ => {}
    }
    for value in &expr.values {
        validate_value(value)?;
    }
    Ok(Requirement {
        key: expr.key.clone(),
        op,
        values: expr.values.clone(),
    })
}

fn matches_pattern(re: &LazyLock<Result<Regex, regex::Error>>, s: &str) -> Result<bool, String> {
    match &**re {
        Ok(re) => Ok(re.is_match(s)),
        Err(e) => Err(format!("label pattern: {e}")),
    }
}

fn validate_key(key: &str) -> Result<(), String> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty()
            || prefix.len() > MAX_PREFIX_LEN
            || !matches_pattern(&DNS_SUBDOMAIN, prefix)?
        {
            return Err(format!("invalid label key prefix in {key:?}"));
        }
    }
    if name.is_empty() || name.len() > MAX_NAME_LEN || !matches_pattern(&LABEL_NAME, name)? {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !matches_pattern(&LABEL_NAME, value)? {
        return Err(format!("invalid label value {value:?}"));
    }
    Ok(())
}
