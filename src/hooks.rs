//! Request/response hooks: ordered callbacks invoked around every
//! outbound attempt, including each hop of a redirect chain.

use std::future::Future;
use std::pin::Pin;

use reqwest::{Request, Response};

use crate::Error;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Called before a request is sent. Returning an error aborts the
/// request without it ever reaching the wire.
pub trait RequestHook: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<(), Error>>;
}

/// Called after a response is received, before the caller (or the
/// redirect loop) sees it.
pub trait ResponseHook: Send + Sync {
    fn call<'a>(&'a self, response: &'a Response) -> BoxFuture<'a, Result<(), Error>>;
}

impl<F> RequestHook for F
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<(), Error>> + Send + Sync,
{
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<(), Error>> {
        self(request)
    }
}

impl<F> ResponseHook for F
where
    F: for<'a> Fn(&'a Response) -> BoxFuture<'a, Result<(), Error>> + Send + Sync,
{
    fn call<'a>(&'a self, response: &'a Response) -> BoxFuture<'a, Result<(), Error>> {
        self(response)
    }
}

/// An ordered set of hooks applied to every request/response pair a
/// [`crate::session::Session`] sends, including each hop of a redirect.
#[derive(Default)]
pub struct Hooks {
    request_hooks: Vec<Box<dyn RequestHook>>,
    response_hooks: Vec<Box<dyn ResponseHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Hooks::default()
    }

    pub fn on_request(mut self, hook: Box<dyn RequestHook>) -> Self {
        self.request_hooks.push(hook);
        self
    }

    pub fn on_response(mut self, hook: Box<dyn ResponseHook>) -> Self {
        self.response_hooks.push(hook);
        self
    }

    pub(crate) async fn run_request(&self, request: &mut Request) -> Result<(), Error> {
        for hook in &self.request_hooks {
            hook.call(request).await?;
        }
        Ok(())
    }

    pub(crate) async fn run_response(&self, response: &Response) -> Result<(), Error> {
        for hook in &self.response_hooks {
            hook.call(response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn request_hooks_run_in_order() {
        let calls = Arc::new(AtomicU32::new(0));
        let first = calls.clone();
        let second = calls.clone();

        let hooks = Hooks::new()
            .on_request(Box::new(move |_req: &mut Request| {
                let first = first.clone();
                Box::pin(async move {
                    assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
                    Ok(())
                }) as BoxFuture<'_, Result<(), Error>>
            }))
            .on_request(Box::new(move |_req: &mut Request| {
                let second = second.clone();
                Box::pin(async move {
                    assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
                    Ok(())
                }) as BoxFuture<'_, Result<(), Error>>
            }));

        let mut request = Request::new(reqwest::Method::GET, "http://example.com".parse().unwrap());
        hooks.run_request(&mut request).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
