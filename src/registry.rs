//! Process-wide table of named circuit breakers.
//!
//! [`BreakerRegistry`] is an explicit object, constructed once at startup and
//! handed by reference to everything that guards a dependency — there is no
//! hidden global, so tests build as many isolated registries as they like.
//! Creation is guarded by the map's write lock: two tasks racing on the
//! first use of a name still end up sharing one breaker.
//!
//! A breaker's config is fixed at first creation. By default it comes from
//! the registry defaults, overridden per dependency name when the registry
//! was built with profiles (a fragile email relay can get a tighter
//! threshold than a fast cache without touching call sites).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};

/// Named circuit breakers, created on first use, alive for the process.
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Registry where every breaker uses `defaults`.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::with_overrides(defaults, HashMap::new())
    }

    /// Registry with per-dependency config profiles. A breaker whose name is
    /// present in `overrides` is created with that profile instead of the
    /// defaults.
    pub fn with_overrides(
        defaults: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            defaults,
            overrides,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `name`, creating it on first use from the
    /// registry's profile for that name (or the defaults).
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(found) = self.breakers.read().unwrap().get(name) {
            return Arc::clone(found);
        }
        let config = self
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        self.insert_if_absent(name, config)
    }

    /// Get the breaker for `name`, creating it with `config` on first use.
    /// If the breaker already exists, `config` is ignored — config is fixed
    /// at creation.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(found) = self.breakers.read().unwrap().get(name) {
            return Arc::clone(found);
        }
        self.insert_if_absent(name, config)
    }

    fn insert_if_absent(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().unwrap();
        // entry() re-checks under the write lock, so concurrent first uses
        // converge on a single breaker.
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = name, "registering circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        }))
    }

    /// Look up an existing breaker without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().unwrap().get(name).map(Arc::clone)
    }

    /// Names of all registered breakers, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().unwrap().len()
    }

    /// True when no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().unwrap().is_empty()
    }

    /// Snapshot every breaker for the operator dump, sorted by name.
    pub async fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let map = self.breakers.read().unwrap();
            map.values().map(Arc::clone).collect()
        };

        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides.len())
            .field("registered", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::error::{FloodgateError, Result};

    #[tokio::test]
    async fn test_same_name_returns_same_breaker() {
        let registry = BreakerRegistry::default();

        let a = registry.get_or_create("email");
        let b = registry.get_or_create("email");
        assert!(Arc::ptr_eq(&a, &b), "one breaker per name");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_config_fixed_at_creation() {
        let registry = BreakerRegistry::default();

        let first = registry.get_or_create_with(
            "email",
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        let second = registry.get_or_create_with(
            "email",
            CircuitBreakerConfig {
                failure_threshold: 99,
                ..Default::default()
            },
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            second.config().failure_threshold,
            3,
            "later configs for an existing name are ignored"
        );
    }

    #[tokio::test]
    async fn test_overrides_apply_per_dependency() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "email".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 120,
                call_timeout_ms: 10_000,
                ..Default::default()
            },
        );
        let registry = BreakerRegistry::with_overrides(CircuitBreakerConfig::default(), overrides);

        assert_eq!(registry.get_or_create("email").config().failure_threshold, 3);
        assert_eq!(
            registry.get_or_create("search").config().failure_threshold,
            5,
            "unlisted dependencies get the defaults"
        );
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let registry = BreakerRegistry::default();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());

        registry.get_or_create("present");
        assert!(registry.get("present").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_converges() {
        let registry = Arc::new(BreakerRegistry::default());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_create("shared")
            }));
        }

        let mut breakers = Vec::new();
        for handle in handles {
            breakers.push(handle.await.expect("task must not panic"));
        }
        assert_eq!(registry.len(), 1, "races on first use create one breaker");
        for breaker in &breakers[1..] {
            assert!(Arc::ptr_eq(&breakers[0], breaker));
        }
    }

    #[tokio::test]
    async fn test_snapshot_all_sorted_by_name() {
        let registry = BreakerRegistry::default();

        let broken = registry.get_or_create("zeta");
        let result: Result<()> = broken
            .call(|| async { Err(FloodgateError::Transient("boom".to_string())) })
            .await;
        assert!(result.is_err());
        registry.get_or_create("alpha");

        let snapshots = registry.snapshot_all().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "alpha");
        assert_eq!(snapshots[1].name, "zeta");
        assert_eq!(snapshots[0].state, CircuitState::Closed);
        assert_eq!(snapshots[1].total_failures, 1);

        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
