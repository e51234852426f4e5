//! Admission gate tying identity, policy resolution, and the sliding
//! window together.
//!
//! The gate is the piece a request boundary talks to: hand it who is
//! calling and what they are calling, get back a [`GateDecision`] carrying
//! the verdict plus the metadata a boundary needs for rate-limit response
//! headers. The decision is returned for rejected calls too, so callers can
//! emit headers on 429 responses instead of a bare refusal.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::error::{FloodgateError, Result};
use crate::limiter::{SlidingWindow, UsageSummary};
use crate::policy::{CallerRole, PolicyResolver};

/// How many leading user-agent characters feed the anonymous fingerprint.
const UA_FINGERPRINT_CHARS: usize = 50;

/// Who is calling: an authenticated account, or an anonymous address
/// fingerprinted by its user agent so NAT'd clients running different
/// software get separate windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    key: String,
    role: CallerRole,
}

impl ClientIdentity {
    pub fn authenticated(user_id: impl fmt::Display, role: CallerRole) -> Self {
        Self {
            key: format!("user:{user_id}"),
            role,
        }
    }

    pub fn anonymous(addr: impl fmt::Display, user_agent: &str) -> Self {
        Self {
            key: format!("ip:{addr}:{}", ua_fingerprint(user_agent)),
            role: CallerRole::Anonymous,
        }
    }

    /// Stable identity portion of rate-limit keys, e.g. `user:42` or
    /// `ip:203.0.113.9:1a2b3c4d`.
    pub fn client_key(&self) -> &str {
        &self.key
    }

    pub fn role(&self) -> CallerRole {
        self.role
    }
}

/// Eight hex characters over the first [`UA_FINGERPRINT_CHARS`] characters
/// of the user agent. Truncating before hashing keeps deliberately inflated
/// agent strings from minting unlimited identities per address.
fn ua_fingerprint(user_agent: &str) -> String {
    let head: String = user_agent.chars().take(UA_FINGERPRINT_CHARS).collect();
    let digest = Sha256::digest(head.as_bytes());
    hex::encode(&digest[..4])
}

/// Outcome of one admission check, with the metadata a boundary needs
/// regardless of the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
    /// When the oldest live entry ages out; `None` when the window is empty
    /// or the store could not say.
    pub reset_at: Option<DateTime<Utc>>,
    /// The full window key the decision was made against.
    pub key: String,
}

impl GateDecision {
    /// Pass an allowed decision through; turn a rejection into
    /// [`FloodgateError::RateLimitExceeded`].
    pub fn require(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(FloodgateError::RateLimitExceeded {
                limit: self.limit,
                window_secs: self.window_secs,
            })
        }
    }

    /// `X-RateLimit-*` header pairs. `X-RateLimit-Reset` (RFC 3339) appears
    /// only when a live entry pins the reset instant.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Window", self.window_secs.to_string()),
        ];
        if let Some(reset_at) = self.reset_at {
            headers.push((
                "X-RateLimit-Reset",
                reset_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        headers
    }
}

/// Composition root for request admission: resolves the applicable policy,
/// consults one sliding-window store, and reports the outcome.
#[derive(Clone)]
pub struct TrafficGate {
    resolver: PolicyResolver,
    window: Arc<dyn SlidingWindow>,
    fail_open: bool,
}

impl TrafficGate {
    /// Gate over `window` with `resolver`'s tables. Fails open by default:
    /// a broken store admits traffic rather than turning a limiter outage
    /// into a full outage.
    pub fn new(resolver: PolicyResolver, window: Arc<dyn SlidingWindow>) -> Self {
        Self {
            resolver,
            window,
            fail_open: true,
        }
    }

    /// `false` propagates store errors to the caller instead of admitting.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Check one request against its resolved policy and record it when
    /// admitted.
    ///
    /// The returned decision always carries limit metadata. When the store
    /// is unreachable and the gate fails open, the decision admits with
    /// degraded metadata (full headroom, no reset instant).
    pub async fn admit(
        &self,
        client: &ClientIdentity,
        method: &str,
        path: &str,
    ) -> Result<GateDecision> {
        let policy = self.resolver.resolve(method, path, client.role());
        let key = format!("{}:{}", client.client_key(), path);
        let window = policy.window();

        let allowed = match self.window.is_allowed(&key, policy.limit, window).await {
            Ok(allowed) => allowed,
            Err(err) if self.fail_open => {
                error!(key, error = %err, "rate-limit store unavailable, admitting");
                return Ok(GateDecision {
                    allowed: true,
                    limit: policy.limit,
                    remaining: policy.limit,
                    window_secs: policy.window_secs,
                    reset_at: None,
                    key,
                });
            }
            Err(err) => return Err(err),
        };

        // Metadata reads are best-effort; a failure here never flips an
        // admission already made.
        let remaining = match self.window.remaining(&key, policy.limit, window).await {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(key, error = %err, "remaining lookup failed after admission");
                0
            }
        };
        let reset_at = match self.window.reset_time(&key, window).await {
            Ok(reset_at) => reset_at,
            Err(err) => {
                warn!(key, error = %err, "reset lookup failed after admission");
                None
            }
        };

        if !allowed {
            warn!(
                key,
                limit = policy.limit,
                window_secs = policy.window_secs,
                role = %client.role(),
                "rate limit exceeded"
            );
        }

        Ok(GateDecision {
            allowed,
            limit: policy.limit,
            remaining,
            window_secs: policy.window_secs,
            reset_at,
            key,
        })
    }

    /// Per-endpoint window occupancy for one client.
    pub async fn usage(&self, client: &ClientIdentity) -> Result<UsageSummary> {
        self.window.usage(client.client_key()).await
    }
}

impl fmt::Debug for TrafficGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficGate")
            .field("resolver", &self.resolver)
            .field("fail_open", &self.fail_open)
            .finish_non_exhaustive()
    }
}
