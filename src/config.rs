//! Tunables for the façade, the session manager, and the host coordinator.
//!
//! These are simple self-consuming fluent builders, not a typestate
//! builder — the knobs here are a flat set of independent defaults, so
//! extra type-state machinery would buy nothing.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// The HTTP version a [`crate::session::Session`] is pinned to for its
/// entire lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http1,
    Http2,
}

impl Default for HttpVersion {
    /// Defaults to the more conservative http/1.1 rather than http/2.
    fn default() -> Self {
        HttpVersion::Http1
    }
}

/// Tunables for a single [`crate::manager::SessionManager`] (one per
/// origin).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Lower bound a fresh Session's `budget_total` is drawn from, and the
    /// floor below which a 429 budget adjustment is rejected as
    /// [`crate::Error::AdjustmentImpossible`] rather than shrinking further.
    pub(crate) min_budget: u32,
    /// Upper bound a fresh Session's `budget_total` is drawn from. This is
    /// the host-local knob a 429 lowers over the life of the manager.
    pub(crate) max_budget: u32,
    /// A Session idle for longer than this is preferred for reuse over one
    /// used more recently, all else equal.
    pub(crate) client_delay: Duration,
    /// HTTP version new Sessions are built with.
    pub(crate) http_version: HttpVersion,
    /// Maximum redirects a Session will follow before `TooManyRedirects`.
    pub(crate) max_redirects: u32,
}

impl ManagerConfig {
    pub fn new() -> Self {
        ManagerConfig::default()
    }

    pub fn min_budget(mut self, n: u32) -> Self {
        self.min_budget = n;
        self
    }

    pub fn max_budget(mut self, n: u32) -> Self {
        self.max_budget = n;
        self
    }

    pub fn client_delay(mut self, d: Duration) -> Self {
        self.client_delay = d;
        self
    }

    pub fn http_version(mut self, v: HttpVersion) -> Self {
        self.http_version = v;
        self
    }

    pub fn max_redirects(mut self, n: u32) -> Self {
        self.max_redirects = n;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            min_budget: 1,
            max_budget: 100,
            client_delay: Duration::from_millis(1200),
            http_version: HttpVersion::default(),
            max_redirects: 10,
        }
    }
}

/// Tunables for a single [`crate::coordinator::HostCoordinator`] (one per
/// origin).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Concurrent in-flight requests allowed against this origin.
    pub(crate) in_flight_permits: usize,
    /// Minimum spacing enforced between successive request starts.
    pub(crate) min_spacing: Duration,
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        CoordinatorConfig::default()
    }

    pub fn in_flight_permits(mut self, n: usize) -> Self {
        self.in_flight_permits = n;
        self
    }

    pub fn min_spacing(mut self, d: Duration) -> Self {
        self.min_spacing = d;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            in_flight_permits: 20,
            min_spacing: Duration::from_millis(0),
        }
    }
}

/// Top-level façade configuration: the proxy pool's eviction threshold,
/// plus the per-origin manager/coordinator defaults and the retry policy
/// applied to every call unless overridden per-request.
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    pub(crate) max_bad_responses: u32,
    pub(crate) manager: ManagerConfig,
    pub(crate) coordinator: CoordinatorConfig,
    pub(crate) retry_policy: RetryPolicy,
}

impl FacadeConfig {
    pub fn new() -> Self {
        FacadeConfig::default()
    }

    pub fn max_bad_responses(mut self, n: u32) -> Self {
        self.max_bad_responses = n;
        self
    }

    pub fn manager(mut self, m: ManagerConfig) -> Self {
        self.manager = m;
        self
    }

    pub fn coordinator(mut self, c: CoordinatorConfig) -> Self {
        self.coordinator = c;
        self
    }

    pub fn retry_policy(mut self, p: RetryPolicy) -> Self {
        self.retry_policy = p;
        self
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            max_bad_responses: 3,
            manager: ManagerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}
