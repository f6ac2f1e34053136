//! A polite, resilient HTTP client façade for scraping and crawling
//! workloads that must route every request through a rotating pool of
//! forward proxies.
//!
//! The entry point is [`Facade`]. It owns a [`pool::ProxyPool`] shared
//! across every origin it talks to, and lazily builds a
//! [`coordinator::HostCoordinator`] (concurrency + pacing) and a
//! [`manager::SessionManager`] (proxy-bound session lifecycle, budget
//! adaptation) per origin the first time it is asked to fetch something
//! there.
//!
//! ```no_run
//! # async fn run() -> Result<(), webber::Error> {
//! let proxies = webber::persist::load_proxies("proxies.json").await?;
//! let facade = webber::Facade::new(proxies, webber::FacadeConfig::new(), None)?;
//! let response = facade.get("https://example.com", vec![], None, None, None).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
mod error;
mod event;
pub mod facade;
pub mod hooks;
pub mod manager;
pub mod persist;
pub mod pool;
pub mod proxy;
pub mod retry;
pub mod session;
mod shutdown;

pub use config::{CoordinatorConfig, FacadeConfig, HttpVersion, ManagerConfig};
pub use error::{Error, TransportErrorKind};
pub use event::Event;
pub use facade::Facade;
pub use hooks::Hooks;
pub use pool::ProxyPool;
pub use proxy::Proxy;
pub use retry::{FailureClass, RetryBudget, RetryPolicy};
pub use session::Session;
