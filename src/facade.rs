//! The façade: the single public entry point, owning one
//! [`crate::coordinator::HostCoordinator`] and one
//! [`crate::manager::SessionManager`] per origin, created lazily on
//! first use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Response;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{FacadeConfig, HttpVersion, ManagerConfig};
use crate::coordinator::HostCoordinator;
use crate::hooks::Hooks;
use crate::manager::SessionManager;
use crate::pool::ProxyPool;
use crate::proxy::Proxy;
use crate::retry::{run_with_retries, RetryPolicy};
use crate::shutdown::ShutdownGuard;
use crate::Error;

struct Origin {
    coordinator: Arc<HostCoordinator>,
    manager: Arc<SessionManager>,
}

/// The top-level client. Holds the shared proxy pool and lazily builds
/// one [`Origin`] (coordinator + manager pair) per distinct host:port
/// the caller talks to.
pub struct Facade {
    pool: Arc<ProxyPool>,
    config: FacadeConfig,
    origins: Mutex<HashMap<String, Arc<Origin>>>,
    persist_path: Option<PathBuf>,
    _shutdown: Option<ShutdownGuard>,
}

impl Facade {
    /// Build a façade over the given proxies. `persist_path`, if given,
    /// is snapshotted with the pool's remaining proxies on SIGINT, and by
    /// an explicit call to [`Facade::shutdown`].
    pub fn new(
        proxies: Vec<Proxy>,
        config: FacadeConfig,
        persist_path: Option<PathBuf>,
    ) -> Result<Self, Error> {
        let pool = Arc::new(ProxyPool::new(proxies, config.max_bad_responses)?);
        let shutdown = Some(ShutdownGuard::install(pool.clone(), persist_path.clone()));
        Ok(Facade {
            pool,
            config,
            origins: Mutex::new(HashMap::new()),
            persist_path,
            _shutdown: shutdown,
        })
    }

    /// Explicit normal-exit cleanup: snapshots the proxy pool to the
    /// configured persistence path (if any). Callers that manage their
    /// own shutdown sequence call this directly; the SIGINT listener
    /// installed at construction calls the same routine automatically.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if let Some(path) = &self.persist_path {
            log::info!("facade shutdown: persisting proxy pool state");
            let proxies = self.pool.snapshot().await;
            crate::persist::save_proxies(path, &proxies).await?;
        }
        Ok(())
    }

    /// The origin name per spec.md §4.E: the URL authority (host plus an
    /// *explicit* port). Scheme differences are deliberately not part of
    /// the key, so `http://example.com` and `https://example.com` share
    /// one `HostCoordinator`/`SessionManager` pair.
    fn origin_key(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        match url.port() {
            Some(port) => Some(format!("{}:{}", host, port)),
            None => Some(host.to_string()),
        }
    }

    async fn origin_for(&self, url: &Url) -> Result<Arc<Origin>, Error> {
        let key = Self::origin_key(url)
            .ok_or_else(|| Error::InvalidProxyUrl(url.to_string()))?;

        let mut origins = self.origins.lock().await;
        if let Some(origin) = origins.get(&key) {
            return Ok(origin.clone());
        }

        let origin = Arc::new(Origin {
            coordinator: Arc::new(HostCoordinator::new(self.config.coordinator.clone())),
            manager: Arc::new(SessionManager::new(
                self.pool.clone(),
                self.config.manager.clone(),
            )),
        });
        origins.insert(key, origin.clone());
        Ok(origin)
    }

    /// Issue one GET request to `url`, retrying per `retry_policy` (or
    /// the façade's default), running `hooks` (or none) around every
    /// attempt and redirect hop, and pinned to `http_version` (or the
    /// manager default configured for this façade) for Session selection
    /// and creation.
    pub async fn get(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        retry_policy: Option<RetryPolicy>,
        hooks: Option<Hooks>,
        http_version: Option<HttpVersion>,
    ) -> Result<Response, Error> {
        let url = Url::parse(url).map_err(|_| Error::InvalidProxyUrl(url.to_string()))?;
        let origin = self.origin_for(&url).await?;
        let policy = retry_policy.unwrap_or_else(|| self.config.retry_policy.clone());
        let hooks = hooks.unwrap_or_default();
        let http_version = http_version.unwrap_or(self.config.manager.http_version);

        run_with_retries(&policy, || {
            let origin = origin.clone();
            let url = url.clone();
            let headers = headers.clone();
            let hooks = &hooks;
            async move {
                let _permit = origin.coordinator.admit().await;
                origin.manager.get(&url, &headers, hooks, http_version).await
            }
        })
        .await
    }

    /// The manager config in effect for newly created origins, exposed
    /// so callers can build their own `ManagerConfig` overrides relative
    /// to the façade's defaults.
    pub fn manager_defaults(&self) -> &ManagerConfig {
        &self.config.manager
    }
}
