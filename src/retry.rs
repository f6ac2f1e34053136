//! The Retry Engine: translates status codes and transport errors into
//! bounded retry counts per failure class.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::error::TransportErrorKind;
use crate::Error;

/// A failure class the retry engine can budget for: either an HTTP status
/// code or a transport error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Status(u16),
    Transport(TransportErrorKind),
}

/// A retry budget for one failure class: either a fixed number of
/// remaining attempts or unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Finite(u32),
    Infinite,
}

impl RetryBudget {
    fn is_exhausted(&self) -> bool {
        matches!(self, RetryBudget::Finite(0))
    }

    fn decremented(self) -> Self {
        match self {
            RetryBudget::Finite(n) => RetryBudget::Finite(n.saturating_sub(1)),
            RetryBudget::Infinite => RetryBudget::Infinite,
        }
    }
}

/// A map from failure class to retry budget, independently tracked per
/// call. Classes absent from the map are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budgets: HashMap<FailureClass, RetryBudget>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        RetryPolicy {
            budgets: HashMap::new(),
        }
    }

    pub fn with(mut self, class: FailureClass, budget: RetryBudget) -> Self {
        self.budgets.insert(class, budget);
        self
    }

    fn budget_for(&self, class: FailureClass) -> Option<RetryBudget> {
        self.budgets.get(&class).copied()
    }
}

impl Default for RetryPolicy {
    /// `{403:5, 429:2, 503:5, read-timeout:1, connect-timeout:inf,
    /// connect-error:inf, proxy-error:inf}`.
    fn default() -> Self {
        RetryPolicy::new()
            .with(FailureClass::Status(403), RetryBudget::Finite(5))
            .with(FailureClass::Status(429), RetryBudget::Finite(2))
            .with(FailureClass::Status(503), RetryBudget::Finite(5))
            .with(
                FailureClass::Transport(TransportErrorKind::ReadTimeout),
                RetryBudget::Finite(1),
            )
            .with(
                FailureClass::Transport(TransportErrorKind::ConnectTimeout),
                RetryBudget::Infinite,
            )
            .with(
                FailureClass::Transport(TransportErrorKind::ConnectError),
                RetryBudget::Infinite,
            )
            .with(
                FailureClass::Transport(TransportErrorKind::ProxyConnectError),
                RetryBudget::Infinite,
            )
    }
}

/// Classifies an [`Error`] into a [`FailureClass`], or `None` if it is not
/// a retryable failure at all (e.g. `AllLeased`, `AdjustmentImpossible`).
fn classify(error: &Error) -> Option<FailureClass> {
    match error {
        Error::HttpStatus(code) => Some(FailureClass::Status(*code)),
        Error::Transport(kind, _) => Some(FailureClass::Transport(*kind)),
        _ => None,
    }
}

/// The back-off inserted before retrying a connect-timeout or
/// connect-error: a flat second plus a little jitter so many Sessions
/// retrying the same dead proxy don't retry in lockstep.
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
const CONNECT_BACKOFF_JITTER_MS: u64 = 250;

fn backoff_with_jitter() -> Duration {
    CONNECT_BACKOFF + Duration::from_millis(rand::thread_rng().gen_range(0..CONNECT_BACKOFF_JITTER_MS))
}

/// Drives one logical GET through repeated attempts, applying the retry
/// policy's per-class budgets. `attempt` performs one request from the
/// Host Coordinator downward and returns its `Result`; `retry_engine`
/// calls it again whenever the policy allows.
pub(crate) async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut policy = policy.clone();
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let Some(class) = classify(&error) else {
                    return Err(error);
                };
                let Some(budget) = policy.budget_for(class) else {
                    return Err(error);
                };
                if budget.is_exhausted() {
                    return Err(error);
                }
                policy.budgets.insert(class, budget.decremented());

                if matches!(
                    class,
                    FailureClass::Transport(TransportErrorKind::ConnectTimeout)
                        | FailureClass::Transport(TransportErrorKind::ConnectError)
                ) {
                    tokio::time::sleep(backoff_with_jitter()).await;
                }
                log::debug!("retrying after {:?}, class {:?}", error, class);
            }
        }
    }
}
