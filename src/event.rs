//! A one-shot wake-up primitive, carried inside [`crate::Error::AllLeased`].
//!
//! Mirrors `asyncio.Event` from the original Python source: `set()` wakes
//! every waiter and stays "set" for later waiters too, `clear()` arms it
//! again. Built on [`tokio::sync::Notify`] plus a flag so that a call to
//! `wait()` arriving after `set()` does not block forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    notify: Notify,
    set: AtomicBool,
}

impl Event {
    pub(crate) fn new() -> Self {
        Event {
            inner: Arc::new(Inner {
                notify: Notify::new(),
                set: AtomicBool::new(false),
            }),
        }
    }

    /// Wake every current and future waiter until the next [`Event::clear`].
    pub(crate) fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Arm the event again so a subsequent [`Event::set`] is needed to
    /// resolve [`Event::wait`].
    pub(crate) fn clear(&self) {
        self.inner.set.store(false, Ordering::SeqCst);
    }

    /// Resolve immediately if the event is already set; otherwise wait for
    /// the next [`Event::set`].
    pub async fn wait(&self) {
        if self.inner.set.load(Ordering::SeqCst) {
            return;
        }
        // Register for notification before the final check to avoid
        // missing a `set()` that happens between the check and the wait.
        let notified = self.inner.notify.notified();
        if self.inner.set.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}
