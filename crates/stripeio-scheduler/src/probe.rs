//! Background driver health probe
//!
//! Every cycle, each registered driver gets a bounded liveness probe and a
//! usage query. An unreachable driver loses a slice of its success window
//! and gets its error instant stamped; a reachable one refreshes the
//! free-space estimate. Results are written through to the catalog's
//! health table. Probe failures never surface to callers.

use crate::scheduler::RaidScheduler;
use std::sync::Arc;
use std::time::Duration;
use stripeio_catalog::MetadataCatalog;
use stripeio_common::DriverState;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Success-window penalty for a failed probe (0.1 of the rate)
const PROBE_PENALTY_OPS: u32 = 10;

/// Probe loop settings
#[derive(Clone, Copy, Debug)]
pub struct HealthProbeConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Spawn the periodic health probe.
///
/// The returned handle can be aborted at shutdown; the loop itself never
/// exits on its own.
pub fn spawn_health_probe(
    scheduler: Arc<RaidScheduler>,
    catalog: Arc<MetadataCatalog>,
    config: HealthProbeConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_cycle(&scheduler, &catalog, config.probe_timeout).await;
        }
    })
}

/// One probe pass over every registered driver
pub async fn probe_cycle(
    scheduler: &RaidScheduler,
    catalog: &MetadataCatalog,
    probe_timeout: Duration,
) {
    let registry = Arc::clone(scheduler.registry());
    for name in registry.names() {
        let Some(driver) = registry.get(&name) else {
            continue;
        };

        let available = timeout(probe_timeout, driver.is_available())
            .await
            .unwrap_or(false);
        if !available {
            warn!(driver = %name, "probe found driver unavailable");
            scheduler.degrade(&name, PROBE_PENALTY_OPS);
        }

        let usage = match timeout(probe_timeout, driver.get_usage()).await {
            Ok(Ok((used, total))) => {
                scheduler.set_free_bytes(&name, total.saturating_sub(used));
                Some((used, total))
            }
            Ok(Err(e)) => {
                debug!(driver = %name, error = %e, "usage query failed");
                None
            }
            Err(_) => {
                debug!(driver = %name, "usage query timed out");
                None
            }
        };

        let state = if available {
            DriverState::Healthy
        } else if scheduler
            .metrics_for(&name)
            .map(|m| m.success_rate() == 0.0)
            .unwrap_or(true)
        {
            DriverState::Failed
        } else {
            DriverState::Degraded
        };

        let (used, total) = match usage {
            Some(u) => u,
            None => catalog
                .driver_health(&name)
                .await
                .map(|h| (h.used_bytes, h.total_bytes))
                .unwrap_or((0, 0)),
        };
        catalog.update_driver_health(&name, state, used, total).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripeio_driver::{DriverRegistry, MemoryDriver, StorageDriver};
    use tempfile::tempdir;

    async fn setup(
        count: usize,
    ) -> (
        Vec<Arc<MemoryDriver>>,
        Arc<RaidScheduler>,
        Arc<MetadataCatalog>,
        tempfile::TempDir,
    ) {
        let mems: Vec<Arc<MemoryDriver>> = (0..count)
            .map(|i| Arc::new(MemoryDriver::new(format!("d{i}"), Some(1000))))
            .collect();
        let drivers: Vec<Arc<dyn StorageDriver>> = mems
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn StorageDriver>)
            .collect();
        let registry = Arc::new(DriverRegistry::new(drivers).unwrap());
        let scheduler = Arc::new(RaidScheduler::new(registry));
        let dir = tempdir().unwrap();
        let catalog = Arc::new(MetadataCatalog::open(dir.path()).await.unwrap());
        (mems, scheduler, catalog, dir)
    }

    #[tokio::test]
    async fn test_probe_marks_healthy() {
        let (_mems, scheduler, catalog, _dir) = setup(2).await;
        probe_cycle(&scheduler, &catalog, Duration::from_secs(1)).await;

        assert!(catalog.unhealthy_drivers().await.is_empty());
        let m = scheduler.metrics_for("d0").unwrap();
        assert_eq!(m.free_bytes, 1000);
    }

    #[tokio::test]
    async fn test_probe_degrades_unavailable_driver() {
        let (mems, scheduler, catalog, _dir) = setup(2).await;
        mems[1].set_available(false);

        probe_cycle(&scheduler, &catalog, Duration::from_secs(1)).await;

        let m = scheduler.metrics_for("d1").unwrap();
        assert!((m.success_rate() - 0.9).abs() < f64::EPSILON);
        assert!(m.last_error.is_some());
        assert_eq!(catalog.unhealthy_drivers().await, vec!["d1"]);

        // Ten more bad cycles drive it to failed.
        for _ in 0..10 {
            probe_cycle(&scheduler, &catalog, Duration::from_secs(1)).await;
        }
        let health = catalog.driver_health("d1").await.unwrap();
        assert_eq!(health.state, DriverState::Failed);
    }

    #[tokio::test]
    async fn test_probe_recovery() {
        let (mems, scheduler, catalog, _dir) = setup(1).await;
        mems[0].set_available(false);
        probe_cycle(&scheduler, &catalog, Duration::from_secs(1)).await;
        assert_eq!(catalog.unhealthy_drivers().await, vec!["d0"]);

        mems[0].set_available(true);
        probe_cycle(&scheduler, &catalog, Duration::from_secs(1)).await;
        assert!(catalog.unhealthy_drivers().await.is_empty());
    }
}
