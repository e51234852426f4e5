//! Request-rate policy tables and their resolution order.
//!
//! A request resolves to a `(limit, window)` pair by walking three tables:
//! ordered endpoint prefixes first, then per-method defaults, then the
//! global fallback. The caller's role then caps the resolved limit —
//! a role cap can tighten a limit but never widen one — while the window
//! always comes from the resolved table entry.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Authorization tier of a caller, ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    Anonymous,
    Viewer,
    Editor,
    Admin,
}

impl fmt::Display for CallerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerRole::Anonymous => write!(f, "anonymous"),
            CallerRole::Viewer => write!(f, "viewer"),
            CallerRole::Editor => write!(f, "editor"),
            CallerRole::Admin => write!(f, "admin"),
        }
    }
}

/// A `(limit, window)` pair: at most `limit` calls per `window_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub limit: u32,
    pub window_secs: u64,
}

impl RatePolicy {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// One endpoint-prefix override. Entries are consulted in order and the
/// first prefix the request path starts with wins, so narrower prefixes
/// must be listed before broader ones that contain them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    pub prefix: String,
    pub limit: u32,
    pub window_secs: u64,
}

impl EndpointPolicy {
    fn policy(&self) -> RatePolicy {
        RatePolicy::new(self.limit, self.window_secs)
    }
}

/// The full policy surface: every table is externally suppliable, and the
/// values here are only what an empty configuration falls back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Fallback when neither an endpoint prefix nor a method entry matches.
    pub global: RatePolicy,
    /// Per-verb defaults. Keys are matched case-insensitively.
    pub methods: HashMap<String, RatePolicy>,
    /// Ordered endpoint-prefix overrides, narrowest first.
    pub endpoints: Vec<EndpointPolicy>,
    /// Hard per-role ceilings applied after table resolution.
    pub role_caps: HashMap<CallerRole, u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            global: RatePolicy::new(100, 60),
            methods: HashMap::from([
                ("GET".to_string(), RatePolicy::new(200, 60)),
                ("POST".to_string(), RatePolicy::new(50, 60)),
                ("PUT".to_string(), RatePolicy::new(30, 60)),
                ("DELETE".to_string(), RatePolicy::new(10, 60)),
                ("PATCH".to_string(), RatePolicy::new(20, 60)),
            ]),
            endpoints: vec![
                EndpointPolicy {
                    prefix: "/auth/login".to_string(),
                    limit: 5,
                    window_secs: 60,
                },
                EndpointPolicy {
                    prefix: "/auth/register".to_string(),
                    limit: 3,
                    window_secs: 300,
                },
                EndpointPolicy {
                    prefix: "/reports".to_string(),
                    limit: 10,
                    window_secs: 60,
                },
            ],
            role_caps: HashMap::from([
                (CallerRole::Anonymous, 30),
                (CallerRole::Viewer, 50),
                (CallerRole::Editor, 100),
                (CallerRole::Admin, 200),
            ]),
        }
    }
}

/// Compiled form of [`PolicyConfig`]: method keys are upper-cased once at
/// construction so per-request lookups stay a single hash probe.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    global: RatePolicy,
    methods: HashMap<String, RatePolicy>,
    endpoints: Vec<EndpointPolicy>,
    role_caps: HashMap<CallerRole, u32>,
}

impl PolicyResolver {
    pub fn new(config: PolicyConfig) -> Self {
        let methods = config
            .methods
            .into_iter()
            .map(|(verb, policy)| (verb.to_ascii_uppercase(), policy))
            .collect();
        Self {
            global: config.global,
            methods,
            endpoints: config.endpoints,
            role_caps: config.role_caps,
        }
    }

    /// Resolve the policy for one request.
    ///
    /// Endpoint prefix beats method default beats global fallback; the
    /// caller's role then caps the limit. The window is always the resolved
    /// table entry's, even when the cap lowers the limit.
    pub fn resolve(&self, method: &str, path: &str, role: CallerRole) -> RatePolicy {
        let resolved = self
            .endpoints
            .iter()
            .find(|endpoint| path.starts_with(endpoint.prefix.as_str()))
            .map(EndpointPolicy::policy)
            .or_else(|| self.methods.get(&method.to_ascii_uppercase()).copied())
            .unwrap_or(self.global);

        match self.role_caps.get(&role) {
            Some(&cap) => RatePolicy::new(resolved.limit.min(cap), resolved.window_secs),
            None => resolved,
        }
    }

    /// The ceiling applied to `role`, when one is configured.
    pub fn role_cap(&self, role: CallerRole) -> Option<u32> {
        self.role_caps.get(&role).copied()
    }
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl From<PolicyConfig> for PolicyResolver {
    fn from(config: PolicyConfig) -> Self {
        Self::new(config)
    }
}
