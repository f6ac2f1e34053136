//! The Session Manager: one instance per origin, responsible for
//! picking a Session to carry a request, retiring Sessions whose budget
//! runs out, and adapting every Session's budget downward when the
//! origin starts responding 429.

use std::sync::Arc;

use rand::Rng;
use reqwest::Response;
use url::Url;

use tokio::sync::Mutex;

use crate::config::{HttpVersion, ManagerConfig};
use crate::hooks::Hooks;
use crate::pool::ProxyPool;
use crate::proxy::Proxy;
use crate::session::Session;
use crate::Error;

/// Mutable per-origin state: the live Session set plus the host-local
/// `max_budget` knob a 429 lowers over the manager's lifetime.
struct State {
    sessions: Vec<Arc<Session>>,
    max_budget: u32,
}

/// Releases a freshly-leased Proxy back to the pool (status unknown) if
/// dropped before [`LeaseGuard::disarm`] is called — i.e. if the calling
/// task is cancelled between leasing the Proxy and handing the new
/// Session off to the manager's live set. Per spec §5: cancellation must
/// release any leased Proxy with no bad-count change.
struct LeaseGuard {
    pool: Arc<ProxyPool>,
    proxy: Option<Proxy>,
}

impl LeaseGuard {
    fn new(pool: Arc<ProxyPool>, proxy: Proxy) -> Self {
        LeaseGuard {
            pool,
            proxy: Some(proxy),
        }
    }

    fn disarm(mut self) {
        self.proxy = None;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            let pool = self.pool.clone();
            log::debug!("caller cancelled before session creation, releasing leased proxy");
            tokio::spawn(async move {
                pool.release(proxy, None).await;
            });
        }
    }
}

/// Clears a Session's busy flag on drop. `acquire_session` marks a
/// Session busy (under the manager's state lock, so no other selection
/// can observe it as idle) before handing it to the caller; this guard
/// is the caller's side of that contract, so cancellation at any point
/// during or after the call — including before the first await past
/// `acquire_session` — still frees the Session for reuse. Per spec §5: a
/// Session is never touched by more than one task at a time.
struct BusyGuard<'a> {
    session: &'a Arc<Session>,
}

impl<'a> BusyGuard<'a> {
    fn attach(session: &'a Arc<Session>) -> Self {
        BusyGuard { session }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.set_busy(false);
    }
}

pub struct SessionManager {
    pool: Arc<ProxyPool>,
    config: ManagerConfig,
    state: Mutex<State>,
}

impl SessionManager {
    pub fn new(pool: Arc<ProxyPool>, config: ManagerConfig) -> Self {
        let max_budget = config.max_budget;
        SessionManager {
            pool,
            config,
            state: Mutex::new(State {
                sessions: Vec::new(),
                max_budget,
            }),
        }
    }

    /// Pick an existing idle, non-busy Session whose `http_version`
    /// matches the request and whose idle time is at least `client_delay`
    /// if one exists, otherwise lease a fresh proxy and build a new
    /// Session for `http_version` with `budget_total` drawn uniformly
    /// from `[min_budget, max_budget]` (the latter possibly already
    /// lowered by an earlier 429 on this origin). The chosen or newly
    /// built Session is marked busy before this returns, under the same
    /// state-lock critical section that selected it, so no concurrent
    /// call can select it too; the caller is responsible for clearing
    /// that flag (via [`BusyGuard`]) once it is done with the Session.
    async fn acquire_session(&self, http_version: HttpVersion) -> Result<Arc<Session>, Error> {
        {
            let state = self.state.lock().await;
            let now = std::time::Instant::now();
            let idle_pos = state.sessions.iter().position(|s| {
                !s.is_busy()
                    && s.http_version() == http_version
                    && now.duration_since(s.last_used_at()) >= self.config.client_delay
            });
            if let Some(pos) = idle_pos {
                let session = state.sessions[pos].clone();
                session.set_busy(true);
                return Ok(session);
            }
        }

        let proxy = self.pool.lease().await?;
        let guard = LeaseGuard::new(self.pool.clone(), proxy.clone());
        let budget_total = {
            let state = self.state.lock().await;
            let min = self.config.min_budget.min(state.max_budget);
            let max = state.max_budget;
            if min == max {
                min
            } else {
                rand::thread_rng().gen_range(min..=max)
            }
        };
        let session = Arc::new(Session::new(
            proxy,
            http_version,
            self.config.max_redirects,
            budget_total,
        )?);
        session.set_busy(true);

        let mut state = self.state.lock().await;
        state.sessions.push(session.clone());
        drop(state);
        guard.disarm();
        Ok(session)
    }

    /// Drop a Session from the live set and release its proxy back to
    /// the pool with the final observed status (`None` for a transport
    /// failure that never produced a status).
    async fn retire(&self, session: &Arc<Session>, last_status: Option<u16>) {
        log::debug!(
            "retiring session on {} (last_status={:?})",
            session.proxy().url(),
            last_status
        );
        let mut state = self.state.lock().await;
        state.sessions.retain(|s| !Arc::ptr_eq(s, session));
        drop(state);
        self.pool.release(session.proxy().clone(), last_status).await;
    }

    /// React to a 429 on `triggering` per the formula
    /// `max_budget := budget_total - (budget_total - budget_left) - 1`,
    /// i.e. one less than the number of successful requests this Session
    /// made before the 429. `manager::get` decrements `budget_left` via
    /// `try_consume_budget` *before* issuing the GET that came back 429,
    /// so `triggering.budget_left()` at this point is already that
    /// pre-429 value minus one — the formula's `budget_left` term and the
    /// outer `- 1` collapse into the Session's current `budget_left()`
    /// directly. Fails with [`Error::AdjustmentImpossible`] without
    /// mutating any state if the result would fall below `min_budget`.
    /// Otherwise lowers the host-local `max_budget` knob and evicts
    /// (closes, releases the proxy with no status) every *other* live
    /// Session whose fixed `budget_total` exceeds the new cap;
    /// `triggering` itself is retired separately by the caller with its
    /// 429 status.
    async fn adapt_to_rate_limit(&self, triggering: &Arc<Session>) -> Result<(), Error> {
        let new_max_budget = triggering.budget_left() as i64;

        if new_max_budget < self.config.min_budget as i64 {
            log::debug!(
                "429 budget adjustment would drop below min_budget ({} < {})",
                new_max_budget,
                self.config.min_budget
            );
            return Err(Error::AdjustmentImpossible);
        }
        let new_max_budget = new_max_budget as u32;

        let evicted: Vec<Arc<Session>> = {
            let mut state = self.state.lock().await;
            state.max_budget = new_max_budget;
            log::debug!("lowering max_budget for this origin to {}", new_max_budget);

            let mut evicted = Vec::new();
            state.sessions.retain(|s| {
                if Arc::ptr_eq(s, triggering) || s.budget_total() <= new_max_budget {
                    true
                } else {
                    evicted.push(s.clone());
                    false
                }
            });
            evicted
        };

        for session in evicted {
            log::debug!(
                "evicting session on {} after budget adjustment (budget_total {} > new max {})",
                session.proxy().url(),
                session.budget_total(),
                new_max_budget
            );
            self.pool.release(session.proxy().clone(), None).await;
        }

        Ok(())
    }

    /// Perform one GET against `url` through whichever Session this
    /// manager selects, handling budget accounting and 429 adaptation.
    /// Transport-level errors and non-429 HTTP errors are passed through
    /// unchanged for the retry engine to classify.
    pub async fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
        hooks: &Hooks,
        http_version: HttpVersion,
    ) -> Result<Response, Error> {
        let session = self.acquire_session(http_version).await?;
        let _busy_guard = BusyGuard::attach(&session);

        if !session.try_consume_budget() {
            self.retire(&session, None).await;
            return Box::pin(self.get(url, headers, hooks, http_version)).await;
        }

        match session.get(url, headers, hooks).await {
            Ok(response) => {
                let status = response.status().as_u16();

                if status == 429 {
                    let adapted = self.adapt_to_rate_limit(&session).await;
                    self.retire(&session, Some(status)).await;
                    adapted?;
                    return Err(Error::HttpStatus(status));
                }

                if response.status().is_client_error() || response.status().is_server_error() {
                    self.retire(&session, Some(status)).await;
                    return Err(Error::HttpStatus(status));
                }

                if session.budget_left() == 0 {
                    self.retire(&session, Some(status)).await;
                }

                Ok(response)
            }
            Err(error) => {
                self.retire(&session, None).await;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<ProxyPool> {
        Arc::new(
            ProxyPool::new(
                vec![
                    Proxy::new("http://p1.example:8080", vec![]).unwrap(),
                    Proxy::new("http://p2.example:8080", vec![]).unwrap(),
                ],
                3,
            )
            .unwrap(),
        )
    }

    // Spec §5: cancellation between leasing a proxy and handing the new
    // Session off to the manager must release the proxy (status unknown).
    #[tokio::test]
    async fn lease_guard_releases_proxy_when_dropped_without_disarm() {
        let p = pool();
        let proxy = p.lease().await.unwrap();
        assert_eq!(p.size().await, 2);

        drop(LeaseGuard::new(p.clone(), proxy.clone()));
        // the release happens on a spawned task; yield until it lands.
        for _ in 0..50 {
            if p.contains(&proxy).await && p.lease().await.is_ok() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("proxy was never released back to the pool");
    }

    #[tokio::test]
    async fn lease_guard_does_not_release_when_disarmed() {
        let p = pool();
        let proxy = p.lease().await.unwrap();

        let guard = LeaseGuard::new(p.clone(), proxy.clone());
        guard.disarm();
        tokio::task::yield_now().await;

        // still leased, not handed back to "available" by the dropped guard.
        assert!(p.contains(&proxy).await);
        let other = p.lease().await.unwrap();
        assert_ne!(other, proxy);
    }

    #[tokio::test]
    async fn acquire_session_leases_new_proxy_when_none_idle() {
        let manager = SessionManager::new(pool(), ManagerConfig::new().min_budget(5).max_budget(5));
        let s1 = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        let s2 = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert_ne!(s1.proxy(), s2.proxy());
        assert_eq!(s1.budget_total(), 5);
    }

    #[tokio::test]
    async fn acquire_session_draws_budget_within_configured_range() {
        let manager = SessionManager::new(pool(), ManagerConfig::new().min_budget(2).max_budget(4));
        let session = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert!((2..=4).contains(&session.budget_total()));
    }

    fn zero_delay_config() -> ManagerConfig {
        ManagerConfig::new()
            .min_budget(5)
            .max_budget(5)
            .client_delay(std::time::Duration::ZERO)
    }

    // S5 — a Session is marked busy while selected and is not handed to a
    // second concurrent caller until the first one is done with it.
    #[tokio::test]
    async fn acquire_session_does_not_hand_out_a_busy_session_concurrently() {
        let manager = SessionManager::new(pool(), zero_delay_config());
        let first = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert!(first.is_busy());

        // `client_delay` is zero, so without the busy flag this would be
        // selected again; it must be skipped and the second proxy leased
        // instead while `first` is still in use.
        let second = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert_ne!(first.proxy(), second.proxy());

        // once freed, it becomes selectable again.
        first.set_busy(false);
        assert!(!first.is_busy());
    }

    #[tokio::test]
    async fn acquire_session_does_not_reuse_a_session_of_a_different_http_version() {
        let manager = SessionManager::new(pool(), zero_delay_config());
        let http1 = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        http1.set_busy(false);

        let http2 = manager.acquire_session(HttpVersion::Http2).await.unwrap();
        assert_ne!(http1.proxy(), http2.proxy());
        assert_eq!(http2.http_version(), HttpVersion::Http2);
    }

    // Spec §5: cancellation mid-call must not leave a Session permanently
    // busy — dropping the BusyGuard always clears the flag.
    #[tokio::test]
    async fn busy_guard_clears_flag_on_drop() {
        let manager = SessionManager::new(pool(), zero_delay_config());
        let session = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert!(session.is_busy());
        {
            let _guard = BusyGuard::attach(&session);
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn adapt_to_rate_limit_rejects_when_below_min_budget() {
        let manager = SessionManager::new(
            pool(),
            ManagerConfig::new().min_budget(1).max_budget(1),
        );
        let session = manager.acquire_session(HttpVersion::Http1).await.unwrap();
        assert!(session.try_consume_budget());
        // budget_total=1, one consume leaves budget_left()=0 < min_budget(1)
        assert!(matches!(
            manager.adapt_to_rate_limit(&session).await.unwrap_err(),
            Error::AdjustmentImpossible
        ));
        // a rejected adjustment must not have mutated the host-local knob.
        assert_eq!(manager.state.lock().await.max_budget, 1);
    }

    // S3 — a successful adjustment evicts every other Session whose fixed
    // `budget_total` exceeds the new cap, leaving the rest untouched.
    #[tokio::test]
    async fn adapt_to_rate_limit_evicts_sessions_over_new_cap() {
        let p = pool();
        let manager = SessionManager::new(p.clone(), ManagerConfig::new().min_budget(1).max_budget(10));

        let triggering = Arc::new(
            Session::new(p.lease().await.unwrap(), manager.config.http_version, 10, 10).unwrap(),
        );
        let under_cap = Arc::new(
            Session::new(p.lease().await.unwrap(), manager.config.http_version, 10, 5).unwrap(),
        );
        manager.pool.add(Proxy::new("http://p3.example:8080", vec![]).unwrap()).await;
        let over_cap = Arc::new(
            Session::new(p.lease().await.unwrap(), manager.config.http_version, 10, 8).unwrap(),
        );

        {
            let mut state = manager.state.lock().await;
            state.sessions = vec![triggering.clone(), under_cap.clone(), over_cap.clone()];
        }

        for _ in 0..4 {
            assert!(triggering.try_consume_budget());
        }
        // budget_total=10, 4 consumed, budget_left()=6 -> new_max_budget=6
        manager.adapt_to_rate_limit(&triggering).await.unwrap();

        let state = manager.state.lock().await;
        assert_eq!(state.max_budget, 6);
        assert!(state.sessions.iter().any(|s| Arc::ptr_eq(s, &triggering)));
        assert!(state.sessions.iter().any(|s| Arc::ptr_eq(s, &under_cap)));
        assert!(!state.sessions.iter().any(|s| Arc::ptr_eq(s, &over_cap)));
        // the evicted Session's proxy went back to the pool with no status.
        assert!(manager.pool.contains(over_cap.proxy()).await);
    }
}
