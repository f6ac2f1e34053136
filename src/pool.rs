//! The Proxy Pool: a rotating, FIFO-ordered, quarantine-aware allocator of
//! proxy identities with consecutive-failure eviction.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

use crate::event::Event;
use crate::proxy::Proxy;
use crate::Error;

struct State {
    available: VecDeque<Proxy>,
    leased: HashSet<Proxy>,
    bad_counts: HashMap<Proxy, u32>,
}

/// Rotating pool of proxies, guarded by a single internal mutex (all
/// four operations mutate under the same lock).
pub struct ProxyPool {
    state: Mutex<State>,
    event: Event,
    max_bad_responses: u32,
}

impl ProxyPool {
    /// Build a pool from a non-empty collection of proxies. Fails with
    /// [`Error::EmptyPool`] on empty input.
    pub fn new(proxies: Vec<Proxy>, max_bad_responses: u32) -> Result<Self, Error> {
        Self::with_seeded_bad_counts(
            proxies.into_iter().map(|p| (p, 0)).collect(),
            max_bad_responses,
        )
    }

    /// Build a pool, seeding each proxy's consecutive-bad-count.
    pub fn with_seeded_bad_counts(
        proxies: Vec<(Proxy, u32)>,
        max_bad_responses: u32,
    ) -> Result<Self, Error> {
        if proxies.is_empty() {
            return Err(Error::EmptyPool);
        }
        let mut available = VecDeque::new();
        let mut bad_counts = HashMap::new();
        for (proxy, count) in proxies {
            bad_counts.insert(proxy.clone(), count);
            available.push_back(proxy);
        }
        Ok(ProxyPool {
            state: Mutex::new(State {
                available,
                leased: HashSet::new(),
                bad_counts,
            }),
            event: Event::new(),
            max_bad_responses,
        })
    }

    /// Lease the front of the available queue. Fails with
    /// [`Error::AllLeased`] when none are available but some are leased
    /// (the returned event fires on the next free); fails with
    /// [`Error::Exhausted`] when the pool is entirely evicted.
    pub async fn lease(&self) -> Result<Proxy, Error> {
        let mut state = self.state.lock().await;
        if let Some(proxy) = state.available.pop_front() {
            state.leased.insert(proxy.clone());
            log::debug!("leased proxy {}", proxy.url());
            return Ok(proxy);
        }
        if !state.leased.is_empty() {
            log::debug!("all proxies leased, caller will wait for a release");
            self.event.clear();
            return Err(Error::AllLeased(self.event.clone()));
        }
        log::debug!("proxy pool exhausted");
        Err(Error::Exhausted)
    }

    /// Return a leased proxy. `last_status` of `None` preserves the
    /// current bad-count; `Some(status) >= 400` increments it;
    /// `Some(status) < 400` resets it to zero. A proxy whose updated count
    /// exceeds `max_bad_responses` is evicted instead of requeued, unless
    /// `max_bad_responses == 0`, in which case eviction never happens.
    pub async fn release(&self, proxy: Proxy, last_status: Option<u16>) {
        let mut state = self.state.lock().await;
        if !state.leased.remove(&proxy) {
            return;
        }
        let count = state.bad_counts.remove(&proxy).unwrap_or(0);
        let new_count = match last_status {
            None => count,
            Some(status) if status >= 400 => count + 1,
            Some(_) => 0,
        };
        if self.max_bad_responses == 0 || new_count <= self.max_bad_responses {
            log::debug!("released proxy {} (bad_count={})", proxy.url(), new_count);
            state.bad_counts.insert(proxy.clone(), new_count);
            state.available.push_back(proxy);
            self.event.set();
        } else {
            log::debug!(
                "evicting proxy {} after {} consecutive bad responses",
                proxy.url(),
                new_count
            );
        }
    }

    /// Add a proxy to the pool. Idempotent: returns `false` if the proxy
    /// (by URL) is already present.
    pub async fn add(&self, proxy: Proxy) -> bool {
        let mut state = self.state.lock().await;
        if state.leased.contains(&proxy) || state.available.iter().any(|p| p == &proxy) {
            return false;
        }
        state.bad_counts.insert(proxy.clone(), 0);
        state.available.push_back(proxy);
        self.event.set();
        true
    }

    /// Remove a proxy from the pool. Fails with [`Error::NotInPool`] if
    /// the proxy is absent.
    pub async fn remove(&self, proxy: &Proxy) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.leased.remove(proxy) {
            state.bad_counts.remove(proxy);
            return Ok(());
        }
        if let Some(pos) = state.available.iter().position(|p| p == proxy) {
            state.available.remove(pos);
            state.bad_counts.remove(proxy);
            return Ok(());
        }
        Err(Error::NotInPool)
    }

    /// Number of proxies currently available or leased (evicted proxies
    /// are not counted).
    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        state.available.len() + state.leased.len()
    }

    /// Whether the proxy (by URL) is currently available or leased.
    pub async fn contains(&self, proxy: &Proxy) -> bool {
        let state = self.state.lock().await;
        state.leased.contains(proxy) || state.available.iter().any(|p| p == proxy)
    }

    /// Whether the pool has any available-or-leased proxies left.
    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// A snapshot of every available-or-leased proxy, for persistence.
    /// Evicted proxies are not included.
    pub async fn snapshot(&self) -> Vec<Proxy> {
        let state = self.state.lock().await;
        state
            .available
            .iter()
            .cloned()
            .chain(state.leased.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(url: &str) -> Proxy {
        Proxy::new(url, vec![]).unwrap()
    }

    #[tokio::test]
    async fn construction_fails_on_empty_pool() {
        assert!(matches!(
            ProxyPool::new(vec![], 1).unwrap_err(),
            Error::EmptyPool
        ));
    }

    // S1 — FIFO rotation.
    #[tokio::test]
    async fn fifo_rotation() {
        let pool = ProxyPool::new(
            vec![proxy("http://p1"), proxy("http://p2"), proxy("http://p3")],
            1,
        )
        .unwrap();

        let p1 = pool.lease().await.unwrap();
        pool.release(p1.clone(), Some(200)).await;

        assert_eq!(pool.lease().await.unwrap(), proxy("http://p2"));
        assert_eq!(pool.lease().await.unwrap(), proxy("http://p3"));
        assert_eq!(pool.lease().await.unwrap(), p1);

        pool.release(p1.clone(), Some(200)).await;
        assert_eq!(pool.lease().await.unwrap(), p1);
    }

    // S4 — bad-count eviction.
    #[tokio::test]
    async fn bad_count_eviction() {
        let pool = ProxyPool::new(vec![proxy("http://p1")], 1).unwrap();
        let p1 = pool.lease().await.unwrap();
        pool.release(p1.clone(), Some(403)).await;
        let p1 = pool.lease().await.unwrap();
        pool.release(p1, Some(500)).await;

        assert!(matches!(pool.lease().await.unwrap_err(), Error::Exhausted));
    }

    // S5 — bad-count reset.
    #[tokio::test]
    async fn bad_count_resets_on_success() {
        let pool = ProxyPool::new(vec![proxy("http://p1")], 1).unwrap();

        let p1 = pool.lease().await.unwrap();
        pool.release(p1.clone(), Some(500)).await; // count 0 -> 1, still <= 1
        let p1 = pool.lease().await.unwrap();
        pool.release(p1.clone(), Some(200)).await; // count -> 0
        let p1 = pool.lease().await.unwrap();
        pool.release(p1.clone(), Some(500)).await; // count -> 1
        let p1 = pool.lease().await.unwrap();
        pool.release(p1, Some(500)).await; // count -> 2, evicted

        assert!(matches!(pool.lease().await.unwrap_err(), Error::Exhausted));
    }

    // S7 — AllLeased wake-up.
    #[tokio::test]
    async fn all_leased_wakes_up_on_free() {
        let pool = ProxyPool::new(vec![proxy("http://p1"), proxy("http://p2")], 1).unwrap();
        let p1 = pool.lease().await.unwrap();
        let _p2 = pool.lease().await.unwrap();

        let event = match pool.lease().await.unwrap_err() {
            Error::AllLeased(event) => event,
            other => panic!("expected AllLeased, got {:?}", other),
        };

        pool.release(p1.clone(), Some(200)).await;
        tokio::time::timeout(std::time::Duration::from_millis(100), event.wait())
            .await
            .expect("event should be set after release");

        assert_eq!(pool.lease().await.unwrap(), p1);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let pool = ProxyPool::new(vec![proxy("http://p1")], 1).unwrap();
        assert!(!pool.add(proxy("http://p1")).await);
        assert!(pool.add(proxy("http://p2")).await);
        assert_eq!(pool.size().await, 2);
    }

    #[tokio::test]
    async fn remove_fails_when_absent() {
        let pool = ProxyPool::new(vec![proxy("http://p1")], 1).unwrap();
        assert!(matches!(
            pool.remove(&proxy("http://missing")).await.unwrap_err(),
            Error::NotInPool
        ));
    }

    #[tokio::test]
    async fn snapshot_includes_leased_and_available() {
        let pool = ProxyPool::new(vec![proxy("http://p1"), proxy("http://p2")], 1).unwrap();
        let _leased = pool.lease().await.unwrap();
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn max_bad_responses_zero_disables_eviction() {
        let pool = ProxyPool::new(vec![proxy("http://p1")], 0).unwrap();
        for _ in 0..10 {
            let p1 = pool.lease().await.unwrap();
            pool.release(p1, Some(500)).await;
        }
        assert!(pool.lease().await.is_ok());
    }
}
