//! End-to-end checks against the public façade surface, exercising
//! proxy-pool wiring without requiring a live upstream proxy.

use webber::retry::{FailureClass, RetryBudget};
use webber::{Facade, FacadeConfig, HttpVersion, Proxy, RetryPolicy, TransportErrorKind};

fn no_retries() -> RetryPolicy {
    RetryPolicy::new().with(
        FailureClass::Transport(TransportErrorKind::ConnectError),
        RetryBudget::Finite(0),
    )
}

#[test]
fn facade_construction_rejects_empty_proxy_list() {
    let result = Facade::new(vec![], FacadeConfig::new(), None);
    assert!(matches!(result.unwrap_err(), webber::Error::EmptyPool));
}

#[tokio::test]
async fn facade_surfaces_transport_error_for_unreachable_proxy() {
    let _ = env_logger::try_init();

    // Port 1 is a reserved port nothing listens on; connecting to it
    // through the proxy fails fast. A zero-budget retry policy keeps the
    // test from looping on the default's infinite connect-error budget.
    let proxy = Proxy::new("http://127.0.0.1:1", vec![]).unwrap();
    let facade = Facade::new(vec![proxy], FacadeConfig::new(), None).unwrap();

    let result = facade
        .get("http://example.com/", vec![], Some(no_retries()), None, None)
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn facade_accepts_a_per_call_http_version_override() {
    let proxy = Proxy::new("http://127.0.0.1:1", vec![]).unwrap();
    let facade = Facade::new(vec![proxy], FacadeConfig::new(), None).unwrap();

    let result = facade
        .get(
            "http://example.com/",
            vec![],
            Some(no_retries()),
            None,
            Some(HttpVersion::Http2),
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn facade_reuses_origin_state_across_calls_to_same_host() {
    let proxy = Proxy::new("http://127.0.0.1:1", vec![]).unwrap();
    let facade = Facade::new(vec![proxy], FacadeConfig::new(), None).unwrap();

    // Two calls to the same origin with only one proxy in the pool: the
    // second call must not deadlock waiting on a lease that the first
    // call's retired session already released.
    let _ = facade
        .get("http://example.com/a", vec![], Some(no_retries()), None, None)
        .await;
    let _ = facade
        .get("http://example.com/b", vec![], Some(no_retries()), None, None)
        .await;
}
