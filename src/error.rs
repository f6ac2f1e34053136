//! Crate-wide error taxonomy.

use std::fmt;
use std::io::Error as IoError;

use crate::event::Event;

/// Errors produced anywhere in this crate.
///
/// Variants map onto the failure taxonomy of the proxy pool, the session
/// manager, and the retry engine. Transport-level failures are carried
/// by [`Error::Transport`] rather than flattened, so the [retry
/// engine](crate::retry) can match on [`TransportErrorKind`] directly.
#[derive(Debug)]
pub enum Error {
    /// A proxy URL failed to parse as an absolute URL, or had no host.
    InvalidProxyUrl(String),
    /// A [`crate::pool::ProxyPool`] was constructed with no proxies.
    EmptyPool,
    /// No proxy is available right now because every proxy is leased.
    /// `AllLeased` carries an [`Event`] that resolves the first time the
    /// pool has at least one proxy available again.
    AllLeased(Event),
    /// Every proxy in the pool has been evicted.
    Exhausted,
    /// The proxy is not a member of the pool.
    NotInPool,
    /// A 429 response drove `max_budget` below `min_budget`. Fatal for the
    /// session manager handling that origin.
    AdjustmentImpossible,
    /// A redirect chain exceeded the configured maximum.
    TooManyRedirects,
    /// The server responded with a 4xx/5xx status code.
    HttpStatus(u16),
    /// A transport-level failure, classified for the retry engine.
    Transport(TransportErrorKind, String),
    /// The on-disk proxy/header-set mapping could not be parsed.
    InvalidHeaderSetFile(String),
    /// An `std::io::Error` that does not fit a more specific variant.
    Io(IoError),
    /// A contract violation that must never be silently swallowed, e.g. a
    /// pending-request counter going negative.
    Internal(String),
}

/// The transport failure classes the retry engine distinguishes (HTTP
/// status codes are tracked separately via [`Error::HttpStatus`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectTimeout,
    ReadTimeout,
    ProxyConnectError,
    ConnectError,
    ProtocolError,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::ConnectTimeout => "connect-timeout",
            TransportErrorKind::ReadTimeout => "read-timeout",
            TransportErrorKind::ProxyConnectError => "proxy-connect-error",
            TransportErrorKind::ConnectError => "connect-error",
            TransportErrorKind::ProtocolError => "protocol-error",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Classify a [`reqwest::Error`] into the transport-failure taxonomy
    /// the retry engine understands.
    ///
    /// `reqwest` does not expose a dedicated "failed to connect through
    /// the proxy, as opposed to the origin" signal, so
    /// [`TransportErrorKind::ProxyConnectError`] is recognised by a
    /// substring sniff of the underlying error chain (hyper/rustls
    /// proxy-tunnel failures mention "proxy" in their `Display`); a
    /// connect failure that doesn't match falls back to the ordinary
    /// [`TransportErrorKind::ConnectError`].
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Error {
        let kind = if err.is_timeout() && err.is_connect() {
            TransportErrorKind::ConnectTimeout
        } else if err.is_timeout() {
            TransportErrorKind::ReadTimeout
        } else if err.is_connect() {
            if err.to_string().to_ascii_lowercase().contains("proxy") {
                TransportErrorKind::ProxyConnectError
            } else {
                TransportErrorKind::ConnectError
            }
        } else if err.is_redirect() {
            return Error::TooManyRedirects;
        } else if err.is_decode() || err.is_body() {
            TransportErrorKind::ProtocolError
        } else {
            TransportErrorKind::ConnectError
        };
        Error::Transport(kind, err.to_string())
    }
}


impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidProxyUrl(url) => write!(f, "proxy: {:?} is not a valid url", url),
            Error::EmptyPool => write!(f, "proxy pool must not be empty"),
            Error::AllLeased(_) => write!(f, "all proxies are in use"),
            Error::Exhausted => write!(f, "proxies have been exhausted"),
            Error::NotInPool => write!(f, "proxy is not in the pool"),
            Error::AdjustmentImpossible => write!(
                f,
                "after continuous budget adjustments, origin is still rate limiting"
            ),
            Error::TooManyRedirects => write!(f, "too many redirects"),
            Error::HttpStatus(code) => write!(f, "server responded with status {}", code),
            Error::Transport(kind, msg) => write!(f, "transport error ({}): {}", kind, msg),
            Error::InvalidHeaderSetFile(msg) => write!(f, "invalid header-set file: {}", msg),
            Error::Io(e) => write!(f, "{}", e),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
