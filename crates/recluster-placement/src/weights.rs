//! Effective metric weights.
//!
//! ```text
//!   policy.metrics[i].weight
//!        │
//!        ├─ first schedule window containing local time: replace | multiply
//!        │
//!        └─ each external feed with a sample, in declaration order:
//!             weight *= mapping.transform(value)
//! ```
//!
//! The result is index-aligned with `policy.spec.metrics`.

use chrono::NaiveTime;
use tracing::{debug, warn};

use recluster_expr::{Bindings, Evaluator};
use recluster_state::{PolicyScheduleEntry, RcPolicy};

/// Variable bound to the latest feed sample in mapping transforms.
pub const FEED_VAR: &str = "value";

/// Parse a "HH:MM" 24-hour clock value.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Whether `now` falls in `[start, end)`. `end <= start` wraps past
/// midnight, so `start == end` covers the whole day.
pub fn window_contains(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if end > start {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// First schedule window (in declaration order) containing `now`.
/// Windows with unparseable times are ignored.
pub fn active_window(policy: &RcPolicy, now: NaiveTime) -> Option<&PolicyScheduleEntry> {
    policy.spec.schedule.iter().find(|entry| {
        match (parse_clock(&entry.start), parse_clock(&entry.end)) {
            (Some(start), Some(end)) => window_contains(start, end, now),
            _ => {
                warn!(
                    policy = %policy.name(),
                    window = %entry.name,
                    start = %entry.start,
                    end = %entry.end,
                    "ignoring malformed schedule window"
                );
                false
            }
        }
    })
}

/// Compute per-metric weights after schedule and feed adjustments.
pub fn effective_weights(eval: &Evaluator, policy: &RcPolicy, now: NaiveTime) -> Vec<f64> {
    let metrics = &policy.spec.metrics;
    let mut weights: Vec<f64> = metrics.iter().map(|m| m.weight).collect();

    if let Some(window) = active_window(policy, now) {
        debug!(policy = %policy.name(), window = %window.name, "schedule window active");
        for adj in &window.adjustments {
            for (i, metric) in metrics.iter().enumerate() {
                if metric.key != adj.key {
                    continue;
                }
                if let Some(replace) = adj.replace {
                    weights[i] = replace;
                } else if let Some(multiply) = adj.multiply {
                    weights[i] *= multiply;
                }
            }
        }
    }

    for feed in &policy.spec.external_feeds {
        let Some(value) = policy.feed_value(&feed.name) else {
            debug!(policy = %policy.name(), feed = %feed.name, "no feed sample yet");
            continue;
        };
        let vars = Bindings::new().with(FEED_VAR, value);
        for mapping in &feed.mappings {
            let multiplier = eval
                .compile(&mapping.transform)
                .map_err(|e| e.to_string())
                .and_then(|prog| prog.eval_f64(&vars).map_err(|e| e.to_string()));
            match multiplier {
                Ok(m) => {
                    for (i, metric) in metrics.iter().enumerate() {
                        if metric.key == mapping.key {
                            weights[i] *= m;
                        }
                    }
                }
                Err(error) => warn!(
                    policy = %policy.name(),
                    feed = %feed.name,
                    metric = %mapping.key,
                    %error,
                    "feed mapping failed; weight unchanged"
                ),
            }
        }
    }

    weights
}
