//! Sliding-window rate limiting with pluggable backends.
//!
//! A sliding window counts events inside a moving interval ending at "now",
//! so admission pressure decays smoothly instead of resetting at bucket
//! edges. Two interchangeable backends implement the same [`SlidingWindow`]
//! contract:
//!
//! - [`memory::MemorySlidingWindow`] — per-key timestamp deques inside the
//!   process; exact, but invisible to other instances.
//! - [`redis::RedisSlidingWindow`] (feature `redis-backend`) — a remote
//!   sorted set per key, letting multiple instances share one budget.
//!
//! Timestamps are wall-clock UTC milliseconds because the distributed
//! backend compares them across processes.

pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub use memory::MemorySlidingWindow;

#[cfg(feature = "redis-backend")]
pub use self::redis::RedisSlidingWindow;

/// Admission contract shared by every backend.
#[async_trait]
pub trait SlidingWindow: Send + Sync {
    /// Purge entries older than `now - window`, then admit and record the
    /// call if the live count is below `limit`. The in-memory backend
    /// records only admitted calls; the distributed backend records the
    /// attempt before counting (see its module docs).
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool>;

    /// Live-entry headroom: `max(0, limit - live)`. Purges stale entries but
    /// never records the call.
    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> Result<u32>;

    /// When the oldest live entry ages out: its timestamp plus `window`.
    /// `None` when the key has no live entries.
    async fn reset_time(&self, key: &str, window: Duration) -> Result<Option<DateTime<Utc>>>;

    /// Per-endpoint live counts for one client, for operator inspection.
    /// Counts are approximate: entries awaiting expiry are included.
    async fn usage(&self, client_key: &str) -> Result<UsageSummary>;
}

/// Operator view of one client's window occupancy across endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub client_id: String,
    /// Endpoint path -> live entry count.
    pub endpoints: BTreeMap<String, u64>,
    pub total: u64,
}

impl UsageSummary {
    pub fn new(client_id: impl Into<String>, endpoints: BTreeMap<String, u64>) -> Self {
        let total = endpoints.values().sum();
        Self {
            client_id: client_id.into(),
            endpoints,
            total,
        }
    }
}

/// Current wall-clock time in UTC milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Window length in milliseconds, saturating for absurd durations.
pub(crate) fn window_millis(window: Duration) -> i64 {
    window.as_millis().min(i64::MAX as u128) as i64
}
