//! Proxy identity: an immutable `{url, header_set}` value.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use url::Url;

use crate::Error;

/// A forward HTTP proxy endpoint with an associated browser-style
/// header-set.
///
/// Two `Proxy` values are equal, and hash equally, iff their URLs are
/// byte-equal — the header-set is not part of identity. Cloning is
/// cheap: the inner data is `Arc`-backed.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    url: Url,
    headers: Vec<(String, String)>,
}

impl Proxy {
    /// Build a proxy from a URL string and an ordered header-set.
    ///
    /// The URL must be an absolute URL with a host, or construction fails
    /// with [`Error::InvalidProxyUrl`].
    pub fn new(url: &str, headers: Vec<(String, String)>) -> Result<Self, Error> {
        let parsed = Url::parse(url).map_err(|_| Error::InvalidProxyUrl(url.to_string()))?;
        if parsed.host_str().is_none() {
            return Err(Error::InvalidProxyUrl(url.to_string()));
        }
        Ok(Proxy {
            inner: Arc::new(ProxyInner {
                url: parsed,
                headers,
            }),
        })
    }

    /// The proxy's URL.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The header-set this proxy contributes to every outbound request,
    /// in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.inner.headers
    }

    /// Merge this proxy's headers with caller-supplied headers: caller
    /// headers win on name conflict, except for the `User-Agent` family,
    /// which the proxy always controls.
    pub(crate) fn merge_headers(
        &self,
        caller_headers: &[(String, String)],
    ) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = Vec::new();
        for (name, value) in &self.inner.headers {
            merged.push((name.clone(), value.clone()));
        }
        for (name, value) in caller_headers {
            if name.eq_ignore_ascii_case("user-agent") {
                continue;
            }
            merged.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            merged.push((name.clone(), value.clone()));
        }
        merged
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.url == other.inner.url
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.url.hash(state);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("url", &self.inner.url.as_str())
            .field("headers", &self.inner.headers.len())
            .finish()
    }
}
