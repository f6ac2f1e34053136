//! Loading and saving the proxy/header-set mapping as JSON, so a pool
//! can be rebuilt across process restarts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::proxy::Proxy;
use crate::Error;

#[derive(Serialize, Deserialize)]
struct ProxyRecord {
    url: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

/// Load a `[{ "url": ..., "headers": {...} }]`-shaped file into a list
/// of [`Proxy`] values, preserving header insertion order.
pub async fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<Proxy>, Error> {
    let contents = tokio::fs::read_to_string(path).await?;
    let records: Vec<ProxyRecord> = serde_json::from_str(&contents)
        .map_err(|e| Error::InvalidHeaderSetFile(e.to_string()))?;

    records
        .into_iter()
        .map(|record| Proxy::new(&record.url, record.headers))
        .collect()
}

/// Write the given proxies out in the same shape [`load_proxies`] reads.
pub async fn save_proxies(path: impl AsRef<Path>, proxies: &[Proxy]) -> Result<(), Error> {
    let records: Vec<ProxyRecord> = proxies
        .iter()
        .map(|p| ProxyRecord {
            url: p.url().to_string(),
            headers: p.headers().to_vec(),
        })
        .collect();

    let contents = serde_json::to_string_pretty(&records)
        .map_err(|e| Error::InvalidHeaderSetFile(e.to_string()))?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}
