//! A Session: one `reqwest::Client` bound to one leased [`Proxy`] for its
//! entire lifetime, with a request budget and a manual redirect loop so
//! hooks see every hop.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use http::Method;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use url::Url;

use crate::config::HttpVersion;
use crate::hooks::Hooks;
use crate::proxy::Proxy;
use crate::Error;

/// A transport bound to a single [`Proxy`], carrying its own request
/// budget and idle clock. A Session never switches proxies: when its
/// budget reaches zero it is retired by the [`crate::manager::SessionManager`]
/// and its proxy released back to the pool.
pub struct Session {
    proxy: Proxy,
    client: Client,
    http_version: HttpVersion,
    max_redirects: u32,
    budget_total: u32,
    budget_left: AtomicI64,
    last_used_at: std::sync::Mutex<Instant>,
    /// Requests sent but not yet resolved. Guarded by [`PendingGuard`] so
    /// the count is balanced even if the calling task is cancelled
    /// mid-request.
    pending: AtomicI64,
    /// Set if [`PendingGuard`] ever observes the counter go negative — a
    /// contract violation that must not be silently swallowed. Once set,
    /// every future call on this Session fails with [`Error::Internal`].
    poisoned: AtomicBool,
    /// Set by [`crate::manager::SessionManager`] while this Session is
    /// selected for a call, so a concurrent selection does not also pick
    /// it. Per spec §5/§3: a Session is never touched by more than one
    /// task at a time.
    busy: AtomicBool,
}

/// RAII guard around one in-flight request: increments `pending` on
/// entry, decrements on drop. Unlike a manual increment/decrement pair,
/// this runs even if the owning future is dropped before completing
/// (caller cancellation), which is what spec §5 requires: cancellation
/// must not leak the pending-request accounting.
struct PendingGuard<'a> {
    pending: &'a AtomicI64,
    poisoned: &'a AtomicBool,
}

impl<'a> PendingGuard<'a> {
    fn enter(pending: &'a AtomicI64, poisoned: &'a AtomicBool) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard { pending, poisoned }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining < 0 {
            log::error!("session pending-request counter went negative");
            self.poisoned.store(true, Ordering::SeqCst);
        }
    }
}

impl Session {
    /// Build a new Session bound to `proxy`, configured for `http_version`
    /// and allowed at most `max_redirects` hops per call.
    pub fn new(
        proxy: Proxy,
        http_version: HttpVersion,
        max_redirects: u32,
        budget_total: u32,
    ) -> Result<Self, Error> {
        let reqwest_proxy = reqwest::Proxy::all(proxy.url().as_str())
            .map_err(|_| Error::InvalidProxyUrl(proxy.url().to_string()))?;

        let mut builder = Client::builder()
            .proxy(reqwest_proxy)
            .redirect(Policy::none());

        builder = match http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Http2 => builder.http2_prior_knowledge(),
        };

        let client = builder
            .build()
            .map_err(|e| Error::Transport(crate::error::TransportErrorKind::ConnectError, e.to_string()))?;

        Ok(Session {
            proxy,
            client,
            http_version,
            max_redirects,
            budget_total,
            budget_left: AtomicI64::new(budget_total as i64),
            last_used_at: std::sync::Mutex::new(Instant::now()),
            pending: AtomicI64::new(0),
            poisoned: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        })
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn http_version(&self) -> HttpVersion {
        self.http_version
    }

    /// Whether a [`crate::manager::SessionManager`] currently has this
    /// Session selected for a call.
    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub(crate) fn set_busy(&self, value: bool) {
        self.busy.store(value, Ordering::SeqCst);
    }

    pub fn budget_total(&self) -> u32 {
        self.budget_total
    }

    pub fn budget_left(&self) -> u32 {
        self.budget_left.load(Ordering::SeqCst).max(0) as u32
    }

    /// Lower the remaining budget. Returns `false` (and does not go below
    /// zero) once the Session is exhausted.
    pub(crate) fn try_consume_budget(&self) -> bool {
        let prev = self.budget_left.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            self.budget_left.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock().unwrap()
    }

    fn touch(&self) {
        *self.last_used_at.lock().unwrap() = Instant::now();
    }

    /// Perform one logical GET, following redirects up to `max_redirects`
    /// hops, running `hooks` around every hop. Fails with
    /// [`Error::TooManyRedirects`] if the chain runs out, or with
    /// [`Error::HttpStatus`] if the final response is a 4xx/5xx and the
    /// caller is expected to treat that as a failure (the manager decides
    /// whether to surface this or treat it as success for 2xx/3xx).
    pub async fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
        hooks: &Hooks,
    ) -> Result<Response, Error> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(Error::Internal(
                "session pending-request counter went negative on a prior call".into(),
            ));
        }
        self.touch();
        let _guard = PendingGuard::enter(&self.pending, &self.poisoned);
        self.get_inner(url, headers, hooks).await
    }

    async fn get_inner(
        &self,
        url: &Url,
        headers: &[(String, String)],
        hooks: &Hooks,
    ) -> Result<Response, Error> {
        let merged = self.proxy.merge_headers(headers);
        let mut current_url = url.clone();

        for _ in 0..=self.max_redirects {
            let mut request = self
                .client
                .request(Method::GET, current_url.clone())
                .build()
                .map_err(Error::from_reqwest)?;

            for (name, value) in &merged {
                if let (Ok(name), Ok(value)) = (
                    reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    request.headers_mut().insert(name, value);
                }
            }

            hooks.run_request(&mut request).await?;

            let response = self
                .client
                .execute(request)
                .await
                .map_err(Error::from_reqwest)?;

            hooks.run_response(&response).await?;

            if response.status().is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    if let Ok(next) = current_url.join(location) {
                        current_url = next;
                        continue;
                    }
                }
            }

            return Ok(response);
        }

        Err(Error::TooManyRedirects)
    }
}
