//! In-process sliding window: per-key timestamp deques.
//!
//! Each key owns an append-only, time-ordered deque guarded by its own
//! mutex, so two admissions for the same key are serialized and can never
//! observe a stale count, while distinct keys proceed in parallel. Purging
//! drops stale entries from the front; ordering makes that O(expired)
//! amortized.
//!
//! State is process-local. Multi-instance deployments that need one shared
//! budget use the distributed backend instead.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{now_millis, window_millis, SlidingWindow, UsageSummary};
use crate::error::Result;

type Entries = Arc<Mutex<VecDeque<i64>>>;

/// Process-local sliding-window store.
#[derive(Default)]
pub struct MemorySlidingWindow {
    windows: RwLock<HashMap<String, Entries>>,
}

impl MemorySlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked (including empty windows awaiting
    /// [`prune`](Self::prune)).
    pub fn tracked_keys(&self) -> usize {
        self.windows.read().unwrap().len()
    }

    /// Drop entries older than `older_than` everywhere and remove keys whose
    /// windows are left empty. Call from a maintenance task with the largest
    /// window in use; an admission racing the sweep may lose its one entry,
    /// which only under-counts that key momentarily.
    pub fn prune(&self, older_than: Duration) -> usize {
        let cutoff = now_millis() - window_millis(older_than);
        let mut windows = self.windows.write().unwrap();
        let before = windows.len();
        windows.retain(|_, entries| match entries.try_lock() {
            Ok(mut guard) => {
                purge(&mut guard, cutoff);
                !guard.is_empty()
            }
            // Key is mid-admission; keep it for the next sweep.
            Err(_) => true,
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "pruned idle rate-limit keys");
        }
        removed
    }

    fn entries_for(&self, key: &str) -> Entries {
        if let Some(found) = self.windows.read().unwrap().get(key) {
            return Arc::clone(found);
        }
        let mut windows = self.windows.write().unwrap();
        Arc::clone(
            windows
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }
}

/// Drop expired entries from the front; entries at exactly the cutoff are
/// expired too.
fn purge(entries: &mut VecDeque<i64>, cutoff: i64) {
    while entries.front().is_some_and(|&ts| ts <= cutoff) {
        entries.pop_front();
    }
}

#[async_trait]
impl SlidingWindow for MemorySlidingWindow {
    async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> Result<bool> {
        let entries = self.entries_for(key);
        let mut entries = entries.lock().await;

        let now = now_millis();
        purge(&mut entries, now - window_millis(window));

        if (entries.len() as u64) < u64::from(limit) {
            entries.push_back(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> Result<u32> {
        let entries = self.entries_for(key);
        let mut entries = entries.lock().await;

        purge(&mut entries, now_millis() - window_millis(window));
        let live = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        Ok(limit.saturating_sub(live))
    }

    async fn reset_time(&self, key: &str, window: Duration) -> Result<Option<DateTime<Utc>>> {
        let entries = self.entries_for(key);
        let mut entries = entries.lock().await;

        purge(&mut entries, now_millis() - window_millis(window));
        Ok(entries
            .front()
            .and_then(|&oldest| DateTime::from_timestamp_millis(oldest + window_millis(window))))
    }

    async fn usage(&self, client_key: &str) -> Result<UsageSummary> {
        let prefix = format!("{}:", client_key);
        let tracked: Vec<(String, Entries)> = {
            let windows = self.windows.read().unwrap();
            windows
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, entries)| (key.clone(), Arc::clone(entries)))
                .collect()
        };

        let mut endpoints = std::collections::BTreeMap::new();
        for (key, entries) in tracked {
            let count = entries.lock().await.len() as u64;
            let endpoint = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
            endpoints.insert(endpoint, count);
        }
        Ok(UsageSummary::new(client_key, endpoints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_allows_up_to_limit_then_rejects() {
        let store = MemorySlidingWindow::new();

        for n in 1..=5 {
            assert!(
                store.is_allowed("user:1:/items", 5, WINDOW).await.unwrap(),
                "call {} of 5 should be admitted",
                n
            );
        }
        assert!(
            !store.is_allowed("user:1:/items", 5, WINDOW).await.unwrap(),
            "sixth call must be rejected"
        );
        assert_eq!(store.remaining("user:1:/items", 5, WINDOW).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_calls_are_not_recorded() {
        let store = MemorySlidingWindow::new();

        for _ in 0..3 {
            assert!(store.is_allowed("user:9:/items", 3, WINDOW).await.unwrap());
        }
        for _ in 0..10 {
            assert!(!store.is_allowed("user:9:/items", 3, WINDOW).await.unwrap());
        }
        // Ten rejections left exactly the three admitted entries live.
        let usage = store.usage("user:9").await.unwrap();
        assert_eq!(usage.total, 3);
        assert_eq!(usage.endpoints.get("/items"), Some(&3));
    }

    #[tokio::test]
    async fn test_window_elapses_and_admits_again() {
        let store = MemorySlidingWindow::new();
        let window = Duration::from_millis(150);

        assert!(store.is_allowed("k", 2, window).await.unwrap());
        assert!(store.is_allowed("k", 2, window).await.unwrap());
        assert!(!store.is_allowed("k", 2, window).await.unwrap());

        sleep(Duration::from_millis(200)).await;
        assert!(
            store.is_allowed("k", 2, window).await.unwrap(),
            "a fresh window must admit again"
        );
    }

    #[tokio::test]
    async fn test_remaining_never_consumes_quota() {
        let store = MemorySlidingWindow::new();

        for _ in 0..10 {
            assert_eq!(store.remaining("k", 3, WINDOW).await.unwrap(), 3);
        }
        for _ in 0..3 {
            assert!(store.is_allowed("k", 3, WINDOW).await.unwrap());
        }
        assert_eq!(store.remaining("k", 3, WINDOW).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_key_isolation() {
        let store = MemorySlidingWindow::new();

        for _ in 0..3 {
            assert!(store.is_allowed("user:a:/items", 3, WINDOW).await.unwrap());
        }
        assert!(!store.is_allowed("user:a:/items", 3, WINDOW).await.unwrap());

        assert!(
            store.is_allowed("user:b:/items", 3, WINDOW).await.unwrap(),
            "exhausting one client must not touch another"
        );
    }

    #[tokio::test]
    async fn test_reset_time_tracks_oldest_entry() {
        let store = MemorySlidingWindow::new();
        let window = Duration::from_millis(200);

        assert!(store.reset_time("k", window).await.unwrap().is_none());

        let before = Utc::now();
        assert!(store.is_allowed("k", 5, window).await.unwrap());
        let reset = store
            .reset_time("k", window)
            .await
            .unwrap()
            .expect("one live entry yields a reset time");
        let expected = before + chrono::Duration::milliseconds(200);
        let drift = (reset - expected).num_milliseconds().abs();
        assert!(drift < 100, "reset drifted {}ms from entry+window", drift);

        sleep(Duration::from_millis(250)).await;
        assert!(
            store.reset_time("k", window).await.unwrap().is_none(),
            "expired entries leave no reset time"
        );
    }

    #[tokio::test]
    async fn test_usage_groups_by_endpoint() {
        let store = MemorySlidingWindow::new();

        for _ in 0..3 {
            assert!(store.is_allowed("user:42:/items", 10, WINDOW).await.unwrap());
        }
        assert!(store.is_allowed("user:42:/orders", 10, WINDOW).await.unwrap());
        assert!(store.is_allowed("user:7:/items", 10, WINDOW).await.unwrap());

        let usage = store.usage("user:42").await.unwrap();
        assert_eq!(usage.total, 4);
        assert_eq!(usage.endpoints.get("/items"), Some(&3));
        assert_eq!(usage.endpoints.get("/orders"), Some(&1));
        assert_eq!(
            usage.endpoints.len(),
            2,
            "other clients never leak into a summary"
        );

        let empty = store.usage("user:999").await.unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_usage_includes_entries_awaiting_expiry() {
        let store = MemorySlidingWindow::new();
        let window = Duration::from_millis(100);

        assert!(store.is_allowed("user:3:/items", 5, window).await.unwrap());
        assert!(store.is_allowed("user:3:/items", 5, window).await.unwrap());
        sleep(Duration::from_millis(150)).await;

        // The summary reads raw window contents without purging.
        assert_eq!(store.usage("user:3").await.unwrap().total, 2);

        // An admission purges the aged-out pair; only itself remains.
        assert!(store.is_allowed("user:3:/items", 5, window).await.unwrap());
        assert_eq!(store.usage("user:3").await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_prune_drops_idle_keys_only() {
        let store = MemorySlidingWindow::new();
        let window = Duration::from_millis(100);

        assert!(store.is_allowed("idle:/a", 5, window).await.unwrap());
        assert!(store.is_allowed("idle:/b", 5, window).await.unwrap());
        sleep(Duration::from_millis(150)).await;
        assert!(store.is_allowed("busy:/c", 5, window).await.unwrap());

        assert_eq!(store.tracked_keys(), 3);
        let removed = store.prune(window);
        assert_eq!(removed, 2, "only the aged-out keys are dropped");
        assert_eq!(store.tracked_keys(), 1);

        // The surviving key still enforces its quota.
        for _ in 0..4 {
            assert!(store.is_allowed("busy:/c", 5, window).await.unwrap());
        }
        assert!(!store.is_allowed("busy:/c", 5, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_everything() {
        let store = MemorySlidingWindow::new();
        assert!(!store.is_allowed("k", 0, WINDOW).await.unwrap());
        assert_eq!(store.remaining("k", 0, WINDOW).await.unwrap(), 0);
    }
}
