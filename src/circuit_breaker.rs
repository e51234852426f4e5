//! Circuit breaker for failure isolation of named dependencies.
//!
//! Implements the classic three-state machine:
//!
//! ```text
//!               failures >= threshold
//!     CLOSED ──────────────────────────> OPEN
//!       ^                                  │
//!       │ successes >= threshold           │ recovery timeout elapsed
//!       │                                  v
//!       └────────────────────────────  HALF_OPEN
//!                                          │
//!                                          │ any failure
//!                                          └──────────> OPEN
//! ```
//!
//! While `OPEN`, calls are rejected immediately with
//! [`FloodgateError::CircuitOpen`] — the guarded operation is never invoked,
//! turning a hung downstream into a cheap local error. Once the recovery
//! timeout since the last failure elapses, the next call probes the
//! dependency in `HALF_OPEN`; consecutive probe successes close the circuit,
//! a single probe failure re-opens it and restarts the recovery clock.
//!
//! Every call runs under the breaker's per-call timeout; an elapsed timeout
//! counts as a failure.
//!
//! # Example
//! ```no_run
//! use floodgate::{CircuitBreaker, CircuitBreakerConfig, FloodgateError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FloodgateError> {
//!     let breaker = CircuitBreaker::new("payments", CircuitBreakerConfig::default());
//!
//!     let receipt = breaker
//!         .call(|| async {
//!             // outbound call here
//!             Ok::<_, FloodgateError>("ok")
//!         })
//!         .await?;
//!     assert_eq!(receipt, "ok");
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{FloodgateError, Result};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing fast, calls rejected until the recovery timeout elapses.
    Open,
    /// Probing: trial calls decide whether to close or re-open.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker tuning. Fixed at breaker creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `CLOSED` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive `HALF_OPEN` successes required to close.
    pub success_threshold: u32,
    /// Seconds after the last failure before a probe is allowed.
    pub recovery_timeout_secs: u64,
    /// Per-call timeout in milliseconds; an elapsed timeout is a failure.
    pub call_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_secs: 60,
            call_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Recovery timeout as a [`Duration`].
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Per-call timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Lifetime counters. `calls` counts executed operations only; rejections
/// never reach the operation and are tallied separately.
#[derive(Debug, Default, Clone, Copy)]
struct LifetimeTotals {
    calls: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejections: u64,
}

/// Mutable breaker state, guarded by one mutex.
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    changed_at: Instant,
    totals: LifetimeTotals,
}

impl BreakerInner {
    fn transition(&mut self, next: CircuitState) {
        self.state = next;
        self.changed_at = Instant::now();
        // Entering a state resets the counter that state decides with.
        match next {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = 0;
            }
            CircuitState::HalfOpen => {
                self.consecutive_successes = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Read-only diagnostic view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    /// Failures / executed calls, 0.0 before the first call.
    pub failure_rate: f64,
    /// Seconds spent in the current state.
    pub uptime_in_state_secs: f64,
    /// Seconds since the last recorded failure, if any.
    pub last_failure_age_secs: Option<f64>,
    /// While `OPEN`: seconds until a probe will be admitted.
    pub open_remaining_secs: Option<f64>,
}

/// Failure-isolation guard for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for `name` with the given config.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                changed_at: Instant::now(),
                totals: LifetimeTotals::default(),
            }),
        }
    }

    /// Name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The config this breaker was created with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state (test and diagnostic helper).
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Execute `op` under this breaker.
    ///
    /// Rejects with [`FloodgateError::CircuitOpen`] while the circuit is open
    /// and the recovery timeout has not elapsed; otherwise runs `op` under
    /// the per-call timeout and records the outcome. The operation's own
    /// failure is re-raised unchanged after bookkeeping. Failures that never
    /// exercised the dependency (an open nested breaker, a rate-limit
    /// rejection) propagate without being recorded.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;

        match timeout(self.config.call_timeout(), op()).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                if err.should_trip_breaker() {
                    self.record_failure(false).await;
                }
                Err(err)
            }
            Err(_elapsed) => {
                self.record_failure(true).await;
                Err(FloodgateError::Timeout {
                    dependency: self.name.clone(),
                    limit: self.config.call_timeout(),
                })
            }
        }
    }

    /// Gate a call: reject while open, move to half-open once the recovery
    /// timeout since the last failure has elapsed.
    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            let recovered = matches!(
                inner.last_failure,
                Some(at) if at.elapsed() >= self.config.recovery_timeout()
            );
            if recovered {
                inner.transition(CircuitState::HalfOpen);
                info!(breaker = %self.name, "recovery timeout elapsed, probing in half-open");
            } else {
                inner.totals.rejections += 1;
                debug!(breaker = %self.name, "circuit open, rejecting call");
                return Err(FloodgateError::CircuitOpen {
                    dependency: self.name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.totals.calls += 1;
        inner.totals.successes += 1;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                inner.transition(CircuitState::Closed);
                info!(breaker = %self.name, "probe succeeded, circuit closed");
            }
        }
    }

    async fn record_failure(&self, timed_out: bool) {
        let mut inner = self.inner.lock().await;
        inner.totals.calls += 1;
        inner.totals.failures += 1;
        if timed_out {
            inner.totals.timeouts += 1;
        }
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open);
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                let failures = inner.consecutive_failures;
                inner.transition(CircuitState::Open);
                warn!(
                    breaker = %self.name,
                    consecutive_failures = failures,
                    "failure threshold reached, circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Snapshot for diagnostics. Serializable for operator endpoints.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        let failure_rate = if inner.totals.calls == 0 {
            0.0
        } else {
            inner.totals.failures as f64 / inner.totals.calls as f64
        };
        let open_remaining_secs = match inner.state {
            CircuitState::Open => inner.last_failure.map(|at| {
                self.config
                    .recovery_timeout()
                    .saturating_sub(at.elapsed())
                    .as_secs_f64()
            }),
            _ => None,
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_secs: self.config.recovery_timeout_secs,
            total_calls: inner.totals.calls,
            total_successes: inner.totals.successes,
            total_failures: inner.totals.failures,
            total_timeouts: inner.totals.timeouts,
            total_rejections: inner.totals.rejections,
            failure_rate,
            uptime_in_state_secs: inner.changed_at.elapsed().as_secs_f64(),
            last_failure_age_secs: inner.last_failure.map(|at| at.elapsed().as_secs_f64()),
            open_remaining_secs,
        }
    }

    /// Operator action: return to pristine `CLOSED`. Lifetime totals are
    /// retained.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.transition(CircuitState::Closed);
        inner.last_failure = None;
        info!(breaker = %self.name, "circuit manually reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
