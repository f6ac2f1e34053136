//! The Host Coordinator: per-origin pacing. Bounds concurrent in-flight
//! requests with a semaphore and enforces a minimum spacing between
//! successive request starts.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};

use crate::config::CoordinatorConfig;

/// Gates requests against one origin (scheme-insensitive host+port).
pub struct HostCoordinator {
    permits: Semaphore,
    min_spacing: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl HostCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        HostCoordinator {
            permits: Semaphore::new(config.in_flight_permits),
            min_spacing: config.min_spacing,
            last_start: Mutex::new(None),
        }
    }

    /// Acquire a concurrency permit and wait out any remaining spacing
    /// window before returning. The returned guard releases the permit
    /// on drop.
    pub async fn admit(&self) -> tokio::sync::SemaphorePermit<'_> {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("coordinator semaphore is never closed");

        if self.min_spacing > Duration::ZERO {
            let mut last_start = self.last_start.lock().await;
            if let Some(previous) = *last_start {
                let elapsed = previous.elapsed();
                if elapsed < self.min_spacing {
                    tokio::time::sleep(self.min_spacing - elapsed).await;
                }
            }
            *last_start = Some(Instant::now());
        }

        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S6 — spacing is enforced between successive admissions.
    #[tokio::test]
    async fn admit_enforces_minimum_spacing() {
        let coordinator = HostCoordinator::new(
            CoordinatorConfig::new()
                .in_flight_permits(4)
                .min_spacing(Duration::from_millis(40)),
        );

        let start = Instant::now();
        {
            let _p1 = coordinator.admit().await;
        }
        {
            let _p2 = coordinator.admit().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn admit_caps_concurrency() {
        let coordinator = std::sync::Arc::new(HostCoordinator::new(
            CoordinatorConfig::new().in_flight_permits(1),
        ));
        let held = coordinator.admit().await;

        let coordinator2 = coordinator.clone();
        let handle = tokio::spawn(async move {
            let _p = coordinator2.admit().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(held);
        handle.await.unwrap();
    }
}
