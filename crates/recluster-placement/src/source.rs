//! Raw metric values read from a node.
//!
//! Built-in keys map straight onto the node spec:
//!
//! | key    | value                  |
//! |--------|------------------------|
//! | `cpu`  | CPU core count         |
//! | `ram`  | memory size in GiB     |
//! | `boot` | cold-boot seconds      |
//!
//! Any other key (or a built-in with an explicit `source`/`selector`) is
//! looked up in the node's JSON document. `jsonPath` selectors look like
//! `$.status.predictedPowerWatts` or `$.spec.storages[0].size`; `fieldPath`
//! selectors look like `metadata.labels['zone-cost']`.

use serde_json::Value as Json;
use thiserror::Error;

use recluster_state::{PolicyMetric, RcNode, ValueFrom};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("invalid selector {selector:?}: {detail}")]
    BadSelector { selector: String, detail: String },

    #[error("no value at {0:?}")]
    Missing(String),

    #[error("value at {path:?} is not numeric: {found}")]
    NotNumeric { path: String, found: String },

    #[error("node document: {0}")]
    Document(String),
}

/// Built-in metric value, if `key` is one of `cpu`, `ram`, `boot`.
pub fn builtin(key: &str, node: &RcNode) -> Option<f64> {
    match key {
        "cpu" => Some(f64::from(node.spec.cpu.cores)),
        "ram" => Some(node.spec.memory_gib()),
        "boot" => Some(node.spec.boot_seconds as f64),
        _ => None,
    }
}

/// Whether this metric needs the node's JSON document.
pub fn needs_document(metric: &PolicyMetric) -> bool {
    metric.source.is_some() || metric.selector.is_some() || builtin_key(&metric.key).is_none()
}

fn builtin_key(key: &str) -> Option<&str> {
    matches!(key, "cpu" | "ram" | "boot").then_some(key)
}

/// JSON view of a node for selector lookups.
pub fn node_document(node: &RcNode) -> Result<Json, MetricError> {
    serde_json::to_value(node).map_err(|e| MetricError::Document(e.to_string()))
}

/// Read the raw (untransformed) value of `metric` for `node`.
///
/// `doc` must be supplied when [`needs_document`] is true.
pub fn raw_value(metric: &PolicyMetric, node: &RcNode, doc: Option<&Json>) -> Result<f64, MetricError> {
    if !needs_document(metric) {
        if let Some(v) = builtin(&metric.key, node) {
            return Ok(v);
        }
    }

    let selector = metric
        .selector
        .clone()
        .unwrap_or_else(|| format!("$.{}", metric.key));
    let owned;
    let doc = match doc {
        Some(doc) => doc,
        None => {
            owned = node_document(node)?;
            &owned
        }
    };

    let segments = match metric.source.unwrap_or_default() {
        ValueFrom::JsonPath => parse_path(&selector, true)?,
        ValueFrom::FieldPath => parse_path(&selector, false)?,
    };
    let found = lookup(doc, &segments).ok_or_else(|| MetricError::Missing(selector.clone()))?;
    to_number(found).ok_or_else(|| MetricError::NotNumeric {
        path: selector,
        found: found.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

fn bad(selector: &str, detail: &str) -> MetricError {
    MetricError::BadSelector {
        selector: selector.to_string(),
        detail: detail.to_string(),
    }
}

/// Split a selector into object fields and array indices.
///
/// With `json_path` the selector may start with `$`; a leading `.` is
/// always optional.
fn parse_path(selector: &str, json_path: bool) -> Result<Vec<Segment>, MetricError> {
    let mut rest = selector.trim();
    if json_path {
        rest = rest.strip_prefix('$').unwrap_or(rest);
    }
    rest = rest.strip_prefix('.').unwrap_or(rest);
    if rest.is_empty() {
        return Err(bad(selector, "empty path"));
    }

    let mut segments = Vec::new();
    let mut chars = rest.char_indices().peekable();
    let mut field = String::new();

    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                if field.is_empty() {
                    return Err(bad(selector, "empty field name"));
                }
                segments.push(Segment::Field(std::mem::take(&mut field)));
            }
            '[' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                let close = rest[i..]
                    .find(']')
                    .map(|off| i + off)
                    .ok_or_else(|| bad(selector, "unclosed '['"))?;
                let inner = rest[i + 1..close].trim();
                let segment = match inner.chars().next() {
                    Some(q @ ('\'' | '"')) => {
                        let name = inner
                            .strip_prefix(q)
                            .and_then(|s| s.strip_suffix(q))
                            .ok_or_else(|| bad(selector, "unterminated quoted key"))?;
                        Segment::Field(name.to_string())
                    }
                    Some(_) => Segment::Index(
                        inner
                            .parse()
                            .map_err(|_| bad(selector, "array index must be a number"))?,
                    ),
                    None => return Err(bad(selector, "empty brackets")),
                };
                segments.push(segment);
                while chars.peek().is_some_and(|(j, _)| *j <= close) {
                    chars.next();
                }
                // A '.' may follow a bracket.
                if chars.peek().is_some_and(|(_, c)| *c == '.') {
                    chars.next();
                    if chars.peek().is_none() {
                        return Err(bad(selector, "trailing '.'"));
                    }
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() {
        segments.push(Segment::Field(field));
    } else if rest.ends_with('.') {
        return Err(bad(selector, "trailing '.'"));
    }
    Ok(segments)
}

fn lookup<'a>(doc: &'a Json, segments: &[Segment]) -> Option<&'a Json> {
    segments.iter().try_fold(doc, |cur, seg| match seg {
        Segment::Field(name) => cur.get(name.as_str()),
        Segment::Index(i) => cur.get(*i),
    })
}

fn to_number(v: &Json) -> Option<f64> {
    match v {
        Json::Number(n) => n.as_f64(),
        Json::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
