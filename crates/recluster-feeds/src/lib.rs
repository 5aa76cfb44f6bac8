//! recluster-feeds — external live-data feeds for placement policies.
//!
//! Policies may declare `externalFeeds` (spot price, carbon intensity, ...)
//! whose latest value scales metric weights. This crate samples those
//! feeds over HTTP and records them in the policy status, where the scorer
//! reads them from the next snapshot.
//!
//! # Architecture
//!
//! ```text
//! FeedSyncer
//!   ├── list policies from StateStore
//!   ├── per (policy, feed): FeedTracker (consecutive failures, backoff)
//!   ├── fetch_sample(url) → f64
//!   └── status.feeds[name] = { value, fetchedAt }, status.lastFeedSync
//! ```
//!
//! Exponential backoff (interval → 10m) keeps a dead feed from being
//! hammered. A single successful fetch resets it.

pub mod error;
pub mod fetch;
pub mod syncer;
pub mod tracker;

pub use error::{FeedError, FeedResult};
pub use fetch::{fetch_sample, parse_sample};
pub use syncer::{FeedSyncer, SyncSummary};
pub use tracker::FeedTracker;
