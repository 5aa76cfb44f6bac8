//! Feed syncer: background task that samples every declared external feed
//! and deposits the values in the owning policy's status.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use recluster_state::{FeedSample, StateError, StateStore};

use crate::error::FeedResult;
use crate::fetch::fetch_sample;
use crate::tracker::FeedTracker;

/// `(policy, feed)` pair.
type FeedKey = (String, String);

struct FeedSlot {
    tracker: FeedTracker,
    next_due: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub fetched: u32,
    pub failed: u32,
    /// Feeds still waiting out their interval or backoff.
    pub skipped: u32,
}

pub struct FeedSyncer {
    store: StateStore,
    interval: Duration,
    timeout: Duration,
    feeds: HashMap<FeedKey, FeedSlot>,
}

impl FeedSyncer {
    pub fn new(store: StateStore, interval: Duration, timeout: Duration) -> Self {
        Self {
            store,
            interval,
            timeout,
            feeds: HashMap::new(),
        }
    }

    /// Fetch every feed that is due. Feeds that disappeared from their
    /// policy are forgotten.
    pub async fn sync_once(&mut self) -> FeedResult<SyncSummary> {
        let policies = self.store.list_policies()?;
        let interval = self.interval;
        let timeout = self.timeout;
        let mut summary = SyncSummary::default();
        let mut declared: HashSet<FeedKey> = HashSet::new();

        for policy in &policies {
            for feed in &policy.spec.external_feeds {
                let key = (policy.name().to_string(), feed.name.clone());
                declared.insert(key.clone());
                let slot = self.feeds.entry(key).or_insert_with(|| FeedSlot {
                    tracker: FeedTracker::new(interval),
                    next_due: Instant::now(),
                });
                if Instant::now() < slot.next_due {
                    summary.skipped += 1;
                    continue;
                }

                match fetch_sample(&feed.url, timeout).await {
                    Ok(value) => {
                        let at = Utc::now();
                        let stored = self.store.update_policy_status(policy.name(), |status| {
                            status.feeds.insert(
                                feed.name.clone(),
                                FeedSample {
                                    value,
                                    fetched_at: at,
                                },
                            );
                            status.last_feed_sync = Some(at);
                        });
                        slot.tracker.record_success();
                        match stored {
                            Ok(_) => {
                                summary.fetched += 1;
                                debug!(policy = %policy.name(), feed = %feed.name, value, "feed sample stored");
                            }
                            Err(StateError::NotFound(_)) => {
                                debug!(policy = %policy.name(), "policy deleted during feed sync");
                            }
                            Err(e) => {
                                summary.failed += 1;
                                error!(
                                    policy = %policy.name(),
                                    feed = %feed.name,
                                    error = %e,
                                    "feed sample could not be stored"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        slot.tracker.record_failure();
                        summary.failed += 1;
                        warn!(
                            policy = %policy.name(),
                            feed = %feed.name,
                            url = %feed.url,
                            error = %e,
                            retry_secs = slot.tracker.next_interval().as_secs(),
                            "feed fetch failed"
                        );
                    }
                }
                slot.next_due = Instant::now() + slot.tracker.next_interval();
            }
        }

        self.feeds.retain(|k, _| declared.contains(k));
        Ok(summary)
    }

    /// Time until the earliest feed is due, or the base interval when no
    /// feed is known yet.
    pub fn next_wakeup(&self) -> Duration {
        let now = Instant::now();
        self.feeds
            .values()
            .map(|slot| slot.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(self.interval)
    }

    /// Number of feeds currently tracked.
    pub fn tracked(&self) -> usize {
        self.feeds.len()
    }

    /// Run the syncer until `shutdown` flips.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "feed syncer started");

        loop {
            match self.sync_once().await {
                Ok(s) if s.fetched + s.failed > 0 => {
                    debug!(fetched = s.fetched, failed = s.failed, skipped = s.skipped, "feed sync pass");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "feed sync failed"),
            }

            let wait = self.next_wakeup().max(Duration::from_millis(100));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("feed syncer shutting down");
                    break;
                }
            }
        }
    }
}
