/*!
 * Configuration surface for the gate, breakers, and retry executor
 */

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{FloodgateError, Result};
use crate::policy::PolicyConfig;
use crate::retry::RetryPolicy;

/// Top-level configuration, loadable from a TOML file. Every section is
/// optional; an empty file yields the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodgateConfig {
    /// Circuit-breaker defaults plus per-dependency overrides.
    pub breaker: BreakerSettings,

    /// Retry behavior for calls through the executor.
    pub retry: RetryPolicy,

    /// Rate-limit policy tables.
    pub policy: PolicyConfig,

    /// Gate behavior at the request boundary.
    pub gate: GateSettings,

    /// Distributed store settings; absent means in-memory windows.
    pub redis: Option<RedisSettings>,
}

/// Breaker defaults and the per-dependency overrides a registry hands out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Applied to every dependency without an override.
    pub defaults: CircuitBreakerConfig,

    /// Overrides keyed by dependency name. A dependency's config is fixed
    /// the first time its breaker is created.
    pub overrides: HashMap<String, CircuitBreakerConfig>,
}

/// Request-boundary behavior of the traffic gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Admit on store failure instead of failing the request.
    pub fail_open: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self { fail_open: true }
    }
}

/// Distributed sliding-window store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Connection URL, e.g. `redis://127.0.0.1/`.
    pub url: String,

    /// Key prefix isolating this limiter's data.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Extra TTL beyond the window before idle keys expire server-side.
    #[serde(default = "default_safety_secs")]
    pub safety_secs: u64,
}

// Default value functions for serde
fn default_namespace() -> String {
    "ratelimit".to_string()
}

fn default_safety_secs() -> u64 {
    5
}

impl FloodgateConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| FloodgateError::Config(format!("read {}: {}", path.display(), err)))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|err| FloodgateError::Config(format!("parse {}: {}", path.display(), err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|err| FloodgateError::Config(err.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|err| FloodgateError::Config(format!("write {}: {}", path.display(), err)))?;
        Ok(())
    }

    /// Reject settings that cannot work at runtime.
    ///
    /// A zero policy limit is deliberately legal: it blocks an endpoint
    /// outright. Zero-length windows and empty prefixes are not, since they
    /// silently disable or shadow the tables around them.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(FloodgateError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        validate_breaker("breaker.defaults", &self.breaker.defaults)?;
        for (name, breaker) in &self.breaker.overrides {
            validate_breaker(&format!("breaker.overrides.{name}"), breaker)?;
        }

        if self.policy.global.window_secs == 0 {
            return Err(FloodgateError::Config(
                "policy.global.window_secs must be at least 1".to_string(),
            ));
        }
        for (verb, method) in &self.policy.methods {
            if method.window_secs == 0 {
                return Err(FloodgateError::Config(format!(
                    "policy.methods.{verb}.window_secs must be at least 1"
                )));
            }
        }
        for endpoint in &self.policy.endpoints {
            if endpoint.prefix.is_empty() {
                return Err(FloodgateError::Config(
                    "policy endpoint prefixes must be non-empty".to_string(),
                ));
            }
            if endpoint.window_secs == 0 {
                return Err(FloodgateError::Config(format!(
                    "policy endpoint {} window_secs must be at least 1",
                    endpoint.prefix
                )));
            }
        }

        if let Some(redis) = &self.redis {
            if redis.url.is_empty() {
                return Err(FloodgateError::Config(
                    "redis.url must be non-empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_breaker(section: &str, config: &CircuitBreakerConfig) -> Result<()> {
    if config.failure_threshold == 0 {
        return Err(FloodgateError::Config(format!(
            "{section}.failure_threshold must be at least 1"
        )));
    }
    if config.success_threshold == 0 {
        return Err(FloodgateError::Config(format!(
            "{section}.success_threshold must be at least 1"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EndpointPolicy;

    #[test]
    fn test_default_config_is_valid() {
        let config = FloodgateConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.gate.fail_open);
        assert!(config.redis.is_none());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.breaker.defaults.failure_threshold, 5);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: FloodgateConfig = toml::from_str("").unwrap();
        assert!(config.gate.fail_open);
        assert_eq!(config.policy.global.limit, 100);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("floodgate.toml");

        let mut config = FloodgateConfig::default();
        config.gate.fail_open = false;
        config.breaker.overrides.insert(
            "email-service".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        config.redis = Some(RedisSettings {
            url: "redis://127.0.0.1/".to_string(),
            namespace: "gate".to_string(),
            safety_secs: 10,
        });

        config.to_file(&path).unwrap();
        let loaded = FloodgateConfig::from_file(&path).unwrap();

        assert!(!loaded.gate.fail_open);
        assert_eq!(
            loaded.breaker.overrides["email-service"].failure_threshold,
            3
        );
        assert_eq!(loaded.redis, Some(config.redis.unwrap()));
    }

    #[test]
    fn test_readme_config_example() {
        // Keep in sync with the README configuration section.
        let toml_str = r#"
[breaker.defaults]
failure_threshold = 5
recovery_timeout_secs = 30

[breaker.overrides.email-service]
failure_threshold = 3
recovery_timeout_secs = 120

[retry]
max_attempts = 4
base_delay_ms = 500
retry_on = ["transient", "timeout"]

[policy]
global = { limit = 100, window_secs = 60 }

[[policy.endpoints]]
prefix = "/exports"
limit = 2
window_secs = 600

[gate]
fail_open = false

[redis]
url = "redis://cache.internal:6379/0"
namespace = "gate"
"#;

        let config: FloodgateConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.breaker.defaults.recovery_timeout_secs, 30);
        assert_eq!(
            config.breaker.overrides["email-service"].recovery_timeout_secs,
            120
        );
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.retry_on.len(), 2);
        assert_eq!(config.policy.endpoints.len(), 1);
        assert_eq!(config.policy.endpoints[0].prefix, "/exports");
        assert_eq!(
            config.policy.methods.len(),
            5,
            "omitted tables keep their defaults"
        );
        assert!(!config.gate.fail_open);
        let redis = config.redis.unwrap();
        assert_eq!(redis.namespace, "gate");
        assert_eq!(redis.safety_secs, 5, "omitted safety margin defaults");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = FloodgateConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(FloodgateError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_breaker_thresholds() {
        let mut config = FloodgateConfig::default();
        config.breaker.overrides.insert(
            "search".to_string(),
            CircuitBreakerConfig {
                success_threshold: 0,
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("breaker.overrides.search"));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut config = FloodgateConfig::default();
        config.policy.endpoints.push(EndpointPolicy {
            prefix: String::new(),
            limit: 10,
            window_secs: 60,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = FloodgateConfig::default();
        config.policy.global.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allows_zero_limit() {
        let mut config = FloodgateConfig::default();
        config.policy.endpoints.push(EndpointPolicy {
            prefix: "/retired".to_string(),
            limit: 0,
            window_secs: 60,
        });
        assert!(config.validate().is_ok(), "a zero limit blocks on purpose");
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = FloodgateConfig::from_file("/nonexistent/floodgate.toml").unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }
}
