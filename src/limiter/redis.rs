//! Distributed sliding window on a Redis sorted set.
//!
//! One sorted set per rate-limit key (`{namespace}:{key}`), scored by UTC
//! milliseconds. Admission runs purge → insert → expire → count as a single
//! MULTI/EXEC pipeline, so the store — not any one process — is the source
//! of truth for concurrent admission across instances, and no interleaving
//! can observe a partially applied sequence.
//!
//! Because the attempt is inserted before counting, a rejected call's entry
//! stays in the set until it ages out: callers hammering past the limit
//! keep the window saturated instead of sneaking through the moment one
//! admitted entry expires. This differs from the in-memory backend, which
//! records admitted calls only.
//!
//! Keys expire `safety_margin` after the window so idle keys clean
//! themselves up server-side.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{now_millis, window_millis, SlidingWindow, UsageSummary};
use crate::error::Result;

const DEFAULT_NAMESPACE: &str = "ratelimit";
const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5);

fn storage_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

fn expiry_secs(window: Duration, safety_margin: Duration) -> i64 {
    (window + safety_margin).as_secs().max(1) as i64
}

/// Redis-backed sliding-window store shared across instances.
#[derive(Clone)]
pub struct RedisSlidingWindow {
    conn: ConnectionManager,
    namespace: String,
    safety_margin: Duration,
}

impl RedisSlidingWindow {
    /// Connect to `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "connected distributed rate-limit store");
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        })
    }

    /// Key prefix isolating this limiter's data (default `ratelimit`).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Extra TTL beyond the window before idle keys expire server-side.
    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    fn storage_key(&self, key: &str) -> String {
        storage_key(&self.namespace, key)
    }

    fn expiry_secs(&self, window: Duration) -> i64 {
        expiry_secs(window, self.safety_margin)
    }
}

#[async_trait]
impl SlidingWindow for RedisSlidingWindow {
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool> {
        let storage_key = self.storage_key(key);
        let now = now_millis();
        let cutoff = now - window_millis(window);
        // Random suffix keeps same-millisecond members distinct.
        let member = format!("{}-{:016x}", now, rand::random::<u64>());

        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&storage_key, 0, cutoff)
            .ignore()
            .zadd(&storage_key, member, now)
            .ignore()
            .expire(&storage_key, self.expiry_secs(window))
            .ignore()
            .zcard(&storage_key)
            .query_async(&mut conn)
            .await?;

        let allowed = count <= i64::from(limit);
        if !allowed {
            debug!(key, count, limit, "distributed window rejected call");
        }
        Ok(allowed)
    }

    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> Result<u32> {
        let storage_key = self.storage_key(key);
        let cutoff = now_millis() - window_millis(window);

        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&storage_key, 0, cutoff)
            .ignore()
            .zcard(&storage_key)
            .query_async(&mut conn)
            .await?;

        let live = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
        Ok(limit.saturating_sub(live))
    }

    async fn reset_time(&self, key: &str, window: Duration) -> Result<Option<DateTime<Utc>>> {
        let storage_key = self.storage_key(key);
        let cutoff = now_millis() - window_millis(window);

        let mut conn = self.conn.clone();
        let (oldest,): (Vec<(String, f64)>,) = redis::pipe()
            .atomic()
            .zrembyscore(&storage_key, 0, cutoff)
            .ignore()
            .zrange_withscores(&storage_key, 0, 0)
            .query_async(&mut conn)
            .await?;

        Ok(oldest.first().and_then(|(_, score)| {
            DateTime::from_timestamp_millis(*score as i64 + window_millis(window))
        }))
    }

    async fn usage(&self, client_key: &str) -> Result<UsageSummary> {
        let prefix = format!("{}:{}:", self.namespace, client_key);
        let pattern = format!("{}*", prefix);

        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(&pattern).await?;

        let mut endpoints = std::collections::BTreeMap::new();
        for key in keys {
            let count: i64 = conn.zcard(&key).await?;
            let endpoint = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
            endpoints.insert(endpoint, count.max(0) as u64);
        }
        Ok(UsageSummary::new(client_key, endpoints))
    }
}

impl std::fmt::Debug for RedisSlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSlidingWindow")
            .field("namespace", &self.namespace)
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}
