//! Per-feed failure tracking with exponential backoff.

use std::time::Duration;

use tracing::{debug, warn};

/// Longest wait between attempts on a failing feed.
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Tracks consecutive fetch results for a single feed.
#[derive(Debug, Clone)]
pub struct FeedTracker {
    consecutive_failures: u32,
    current_backoff: Duration,
    base_interval: Duration,
    max_backoff: Duration,
}

impl FeedTracker {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_backoff: base_interval,
            base_interval,
            max_backoff: MAX_BACKOFF.max(base_interval),
        }
    }

    /// A successful fetch resets the backoff to the base interval.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(failures = self.consecutive_failures, "feed recovered");
        }
        self.consecutive_failures = 0;
        self.current_backoff = self.base_interval;
    }

    /// A failed fetch doubles the wait, up to the cap.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.current_backoff = self.current_backoff.saturating_mul(2).min(self.max_backoff);
        if self.current_backoff == self.max_backoff {
            warn!(
                failures = self.consecutive_failures,
                backoff_secs = self.current_backoff.as_secs(),
                "feed failing; backoff at maximum"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next attempt.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }
}
