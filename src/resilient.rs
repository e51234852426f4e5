//! Composition of retry and circuit breaking for outbound calls.
//!
//! [`Resilient`] wraps an operation as `retry(breaker(op))`: every attempt
//! passes through the breaker, so a circuit that opens mid-sequence turns
//! the remaining attempts into immediate [`FloodgateError::CircuitOpen`]
//! rejections — and because `circuit_open` is not in the default retryable
//! set, the rejection propagates at once instead of burning the rest of the
//! retry budget against a known-broken dependency. Callers that want to
//! wait out the recovery window can add `circuit_open` to
//! [`RetryPolicy::retry_on`] deliberately.

use std::future::Future;
use std::sync::Arc;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::Result;
use crate::registry::BreakerRegistry;
use crate::retry::RetryPolicy;

/// An operation wrapper combining a named breaker with a retry policy.
#[derive(Debug, Clone)]
pub struct Resilient {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl Resilient {
    /// Combine an existing breaker with a retry policy.
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    /// Wrapper for `name`, acquiring the breaker from `registry` (created on
    /// first use with the registry's profile for that name) and the default
    /// retry policy.
    pub fn for_dependency(registry: &BreakerRegistry, name: &str) -> Self {
        Self {
            breaker: registry.get_or_create(name),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The breaker guarding this wrapper's dependency.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` with retries, each attempt guarded by the breaker.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry.execute(|| self.breaker.call(&op)).await
    }
}
