//! Error types for the traffic-resilience layer.
//!
//! Every failure that crosses a public boundary is a [`FloodgateError`].
//! Callers wrap their own operation failures in [`FloodgateError::Transient`]
//! or [`FloodgateError::Permanent`] (or convert `std::io::Error` via `From`,
//! which classifies by kind); the retry executor decides retryability from
//! [`ErrorCategory`] so the retryable set can live in configuration.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FloodgateError>;

/// Failures surfaced by the resilience layer.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// The circuit breaker rejected the call without executing it.
    #[error("circuit breaker '{dependency}' is open, call rejected")]
    CircuitOpen {
        /// Name of the guarded dependency.
        dependency: String,
    },

    /// The guarded operation exceeded the breaker's per-call timeout.
    #[error("call to '{dependency}' timed out after {limit:?}")]
    Timeout {
        /// Name of the guarded dependency.
        dependency: String,
        /// The configured per-call limit that elapsed.
        limit: Duration,
    },

    /// Every retry attempt was consumed; `last` is the final attempt's failure.
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<FloodgateError>,
    },

    /// An admission check failed. Expected and user-facing, not a fault.
    #[error("rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimitExceeded { limit: u32, window_secs: u64 },

    /// A failure worth retrying (connection resets, temporary unavailability).
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that will not improve with retries.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The rate-limit backing store misbehaved (treated as transient).
    #[error("rate-limit store failure: {0}")]
    Store(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error category for logging, instrumentation, and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Recoverable failures worth retrying
    Transient,
    /// Per-call timeouts inside a breaker
    Timeout,
    /// Failures that will not improve with retries
    Permanent,
    /// Fail-fast rejections from an open breaker
    CircuitOpen,
    /// Admission rejections from the rate limiter
    RateLimit,
    /// Rate-limit backing store failures
    Store,
    /// Retry budget exhaustion
    Exhausted,
    /// Configuration problems
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::CircuitOpen => write!(f, "circuit_open"),
            ErrorCategory::RateLimit => write!(f, "rate_limit"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Exhausted => write!(f, "exhausted"),
            ErrorCategory::Config => write!(f, "config"),
        }
    }
}

impl FloodgateError {
    /// Get the error category for logging and retry classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FloodgateError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            FloodgateError::Timeout { .. } => ErrorCategory::Timeout,
            FloodgateError::RetryExhausted { .. } => ErrorCategory::Exhausted,
            FloodgateError::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            FloodgateError::Transient(_) => ErrorCategory::Transient,
            FloodgateError::Permanent(_) => ErrorCategory::Permanent,
            FloodgateError::Store(_) => ErrorCategory::Store,
            FloodgateError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Check if this error is worth retrying under the default policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Timeout | ErrorCategory::Store
        )
    }

    /// Check if this error will not improve with retries.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Permanent | ErrorCategory::Config
        )
    }

    /// Whether a circuit breaker should count this as a dependency failure.
    ///
    /// Open-circuit and rate-limit rejections are local control-flow signals:
    /// the dependency was never actually exercised.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            FloodgateError::CircuitOpen { .. } | FloodgateError::RateLimitExceeded { .. }
        )
    }
}

impl From<io::Error> for FloodgateError {
    /// Classify an I/O failure by kind: connection-level interruptions are
    /// transient, everything else (not-found, permissions, corrupt data) is
    /// permanent.
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        if matches!(
            err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        ) {
            FloodgateError::Transient(err.to_string())
        } else {
            FloodgateError::Permanent(err.to_string())
        }
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for FloodgateError {
    fn from(err: redis::RedisError) -> Self {
        FloodgateError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(FloodgateError::Transient("connection reset".to_string()).is_transient());
        assert!(FloodgateError::Store("MOVED 3999".to_string()).is_transient());
        assert!(FloodgateError::Timeout {
            dependency: "billing".to_string(),
            limit: Duration::from_secs(30),
        }
        .is_transient());

        assert!(!FloodgateError::Permanent("bad request".to_string()).is_transient());
        assert!(!FloodgateError::CircuitOpen {
            dependency: "billing".to_string()
        }
        .is_transient());
        assert!(!FloodgateError::Config("negative limit".to_string()).is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(FloodgateError::Permanent("schema mismatch".to_string()).is_permanent());
        assert!(FloodgateError::Config("bad config".to_string()).is_permanent());
        assert!(!FloodgateError::Transient("flaky".to_string()).is_permanent());
        assert!(!FloodgateError::RateLimitExceeded {
            limit: 5,
            window_secs: 60
        }
        .is_permanent());
    }

    #[test]
    fn test_breaker_trip_classification() {
        assert!(FloodgateError::Transient("reset".to_string()).should_trip_breaker());
        assert!(FloodgateError::Permanent("bad".to_string()).should_trip_breaker());
        assert!(FloodgateError::Timeout {
            dependency: "search".to_string(),
            limit: Duration::from_secs(2),
        }
        .should_trip_breaker());

        // Local rejections never exercised the dependency.
        assert!(!FloodgateError::CircuitOpen {
            dependency: "search".to_string()
        }
        .should_trip_breaker());
        assert!(!FloodgateError::RateLimitExceeded {
            limit: 100,
            window_secs: 60
        }
        .should_trip_breaker());
    }

    #[test]
    fn test_io_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(FloodgateError::from(refused).is_transient());

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        assert!(FloodgateError::from(timed_out).is_transient());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(FloodgateError::from(denied).is_permanent());

        let missing = io::Error::new(io::ErrorKind::NotFound, "not found");
        assert!(FloodgateError::from(missing).is_permanent());
    }

    #[test]
    fn test_error_display() {
        let err = FloodgateError::CircuitOpen {
            dependency: "email".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "circuit breaker 'email' is open, call rejected"
        );

        let err = FloodgateError::RateLimitExceeded {
            limit: 5,
            window_secs: 60,
        };
        assert_eq!(err.to_string(), "rate limit exceeded: 5 requests per 60s");
    }

    #[test]
    fn test_exhausted_carries_source() {
        let last = FloodgateError::Transient("still flaky".to_string());
        let err = FloodgateError::RetryExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        assert_eq!(err.category(), ErrorCategory::Exhausted);

        let source = std::error::Error::source(&err).expect("exhaustion must chain its cause");
        assert_eq!(source.to_string(), "transient failure: still flaky");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(ErrorCategory::RateLimit.to_string(), "rate_limit");
        assert_eq!(ErrorCategory::Transient.to_string(), "transient");
    }

    #[test]
    fn test_category_serde_names() {
        #[derive(Deserialize)]
        struct Doc {
            retry_on: Vec<ErrorCategory>,
        }

        let doc: Doc = toml::from_str("retry_on = [\"transient\", \"timeout\", \"store\"]")
            .expect("category names must parse");
        assert_eq!(
            doc.retry_on,
            vec![
                ErrorCategory::Transient,
                ErrorCategory::Timeout,
                ErrorCategory::Store
            ]
        );
    }
}
