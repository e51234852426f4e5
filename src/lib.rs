/*!
 * Floodgate - Traffic resilience for service boundaries
 *
 * A layered admission-control library with:
 * - Per-dependency circuit breakers with half-open probing
 * - Retry execution with exponential backoff and jitter
 * - Sliding-window rate limiting, in-memory or on Redis
 * - Policy tables resolving endpoint, method, and role limits
 * - A traffic gate composing identity, policy, and window checks
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod policy;
pub mod registry;
pub mod resilient;
pub mod retry;

// Re-export commonly used types
pub use backoff::backoff_delay;
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::FloodgateConfig;
pub use error::{ErrorCategory, FloodgateError, Result};
pub use gate::{ClientIdentity, GateDecision, TrafficGate};
#[cfg(feature = "redis-backend")]
pub use limiter::RedisSlidingWindow;
pub use limiter::{MemorySlidingWindow, SlidingWindow, UsageSummary};
pub use policy::{CallerRole, PolicyConfig, PolicyResolver, RatePolicy};
pub use registry::BreakerRegistry;
pub use resilient::Resilient;
pub use retry::RetryPolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
