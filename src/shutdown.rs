//! Centralized shutdown handling: a Ctrl-C listener that gives the
//! façade one chance to persist its proxy pool before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use crate::persist;
use crate::pool::ProxyPool;

/// Installed once by [`crate::facade::Facade`]. Spawns a background task
/// that waits for SIGINT and, if a persistence path was configured,
/// snapshots the pool's current available proxies before returning
/// control to the default Ctrl-C behavior.
pub struct ShutdownGuard {
    task: tokio::task::JoinHandle<()>,
}

impl ShutdownGuard {
    pub fn install(pool: Arc<ProxyPool>, persist_path: Option<PathBuf>) -> Self {
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                log::warn!("failed to install ctrl-c handler, shutdown snapshot disabled");
                return;
            }
            log::info!("received shutdown signal, persisting proxy pool state");
            if let Some(path) = persist_path {
                if let Err(e) = snapshot(&pool, &path).await {
                    log::error!("failed to persist proxy pool on shutdown: {}", e);
                }
            }
        });
        ShutdownGuard { task }
    }
}

async fn snapshot(pool: &Arc<ProxyPool>, path: &std::path::Path) -> Result<(), crate::Error> {
    let proxies = pool.snapshot().await;
    persist::save_proxies(path, &proxies).await
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
