//! Bounded retry execution with exponential backoff.
//!
//! [`RetryPolicy`] drives an operation through up to `max_attempts` tries,
//! sleeping a jittered, capped, doubling delay between failures. Only
//! failures whose [`ErrorCategory`] is listed in `retry_on` consume extra
//! attempts; anything else propagates on first occurrence. Async and
//! blocking variants share identical semantics, differing only in how the
//! inter-attempt wait suspends.
//!
//! # Example
//! ```no_run
//! use floodgate::{FloodgateError, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FloodgateError> {
//!     let policy = RetryPolicy::default();
//!     let value = policy
//!         .execute(|| async {
//!             // flaky call here
//!             Ok::<_, FloodgateError>(42)
//!         })
//!         .await?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backoff::backoff_delay;
use crate::error::{ErrorCategory, FloodgateError, Result};

/// Retry configuration. Serializable so the whole policy, including the
/// retryable-category set, can come from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry).
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on the unjittered delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Apply ±25% uniform jitter to each delay.
    pub jitter: bool,
    /// Failure categories that consume retry attempts.
    pub retry_on: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
            retry_on: default_retry_on(),
        }
    }
}

fn default_retry_on() -> Vec<ErrorCategory> {
    vec![
        ErrorCategory::Transient,
        ErrorCategory::Timeout,
        ErrorCategory::Store,
    ]
}

impl RetryPolicy {
    /// Quick retries for interactive paths: 3 attempts, 100ms..5s.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            ..Default::default()
        }
    }

    /// Patient retries for network calls: 4 attempts, 500ms..30s.
    pub fn network() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            ..Default::default()
        }
    }

    /// Delay after the first failure.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Cap on the unjittered delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether a failure consumes a retry attempt under this policy.
    pub fn is_retryable(&self, err: &FloodgateError) -> bool {
        self.retry_on.contains(&err.category())
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay(), self.max_delay(), self.jitter)
    }

    /// Run an async operation under this policy.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_hook(op, |_attempt, _err| Ok(())).await
    }

    /// Run an async operation, invoking `hook(attempt, failure)` before each
    /// backoff sleep. Hook failures are logged and swallowed; they never
    /// abort the retry loop.
    pub async fn execute_with_hook<F, Fut, T, H>(&self, mut op: F, mut hook: H) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(u32, &FloodgateError) -> Result<()>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if !self.is_retryable(&err) => {
                    debug!(category = %err.category(), "failure not retryable, propagating");
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= attempts {
                        error!(attempts, last_error = %err, "retry budget exhausted");
                        return Err(FloodgateError::RetryExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.next_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    if let Err(hook_err) = hook(attempt, &err) {
                        warn!(error = %hook_err, "retry hook failed, continuing");
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run a blocking operation under this policy (`std::thread::sleep`
    /// between attempts). Same semantics as [`execute`](Self::execute).
    pub fn execute_blocking<F, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.execute_blocking_with_hook(op, |_attempt, _err| Ok(()))
    }

    /// Blocking variant of [`execute_with_hook`](Self::execute_with_hook).
    pub fn execute_blocking_with_hook<F, T, H>(&self, mut op: F, mut hook: H) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        H: FnMut(u32, &FloodgateError) -> Result<()>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if !self.is_retryable(&err) => {
                    debug!(category = %err.category(), "failure not retryable, propagating");
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= attempts {
                        error!(attempts, last_error = %err, "retry budget exhausted");
                        return Err(FloodgateError::RetryExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.next_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    if let Err(hook_err) = hook(attempt, &err) {
                        warn!(error = %hook_err, "retry hook failed, continuing");
                    }
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
