//! Level-aware driver selection
//!
//! Selection is read-only over the metrics table; `record_operation` and
//! the health probe take the writer side.

use crate::metrics::DriverMetrics;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stripeio_common::{Error, RaidLevel, Result};
use stripeio_driver::DriverRegistry;
use tracing::debug;

/// Free space beyond this cap no longer improves the composite score
const FREE_SPACE_CAP: u64 = 10 * 1024 * 1024 * 1024;

/// Weights of the composite driver score
#[derive(Clone, Copy, Debug)]
pub struct ScoreWeights {
    pub latency: f64,
    pub success: f64,
    pub load: f64,
    pub space: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.3,
            success: 0.4,
            load: 0.2,
            space: 0.1,
        }
    }
}

/// Drivers chosen for one stripe
///
/// For RAID 5 the driver at `parity_index` carries the stripe's parity
/// block; the engine labels that block accordingly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub drivers: Vec<String>,
    pub parity_index: Option<usize>,
}

/// Adaptive scheduler over a fixed driver registry
pub struct RaidScheduler {
    registry: Arc<DriverRegistry>,
    metrics: RwLock<HashMap<String, DriverMetrics>>,
    weights: ScoreWeights,
}

impl RaidScheduler {
    /// Create a scheduler with fresh metrics for every registered driver
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_weights(registry, ScoreWeights::default())
    }

    /// Create a scheduler with custom score weights
    #[must_use]
    pub fn with_weights(registry: Arc<DriverRegistry>, weights: ScoreWeights) -> Self {
        let metrics = registry
            .names()
            .into_iter()
            .map(|name| (name.clone(), DriverMetrics::seed(name)))
            .collect();
        Self {
            registry,
            metrics: RwLock::new(metrics),
            weights,
        }
    }

    /// The registry this scheduler selects from
    #[must_use]
    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Fold one block I/O outcome into the driver's metrics
    pub fn record_operation(&self, driver: &str, success: bool, latency: Duration) {
        let mut guard = self.metrics.write();
        if let Some(m) = guard.get_mut(driver) {
            m.record(success, latency, Instant::now());
        }
    }

    /// Snapshot of one driver's metrics
    #[must_use]
    pub fn metrics_for(&self, driver: &str) -> Option<DriverMetrics> {
        self.metrics.read().get(driver).cloned()
    }

    /// Knock a driver's success window down (health probe path)
    pub(crate) fn degrade(&self, driver: &str, ops: u32) {
        let mut guard = self.metrics.write();
        if let Some(m) = guard.get_mut(driver) {
            m.degrade(ops, Instant::now());
        }
    }

    /// Refresh a driver's free-space estimate (health probe path)
    pub(crate) fn set_free_bytes(&self, driver: &str, free_bytes: u64) {
        let mut guard = self.metrics.write();
        if let Some(m) = guard.get_mut(driver) {
            m.free_bytes = free_bytes;
        }
    }

    /// Pick the driver set for one stripe.
    ///
    /// `exclude` lists drivers the caller refuses regardless of metrics.
    /// Fails with a configuration error when too few drivers are eligible
    /// for the level.
    pub fn select_for_stripe(
        &self,
        level: RaidLevel,
        stripe_index: usize,
        exclude: &[String],
    ) -> Result<Selection> {
        let guard = self.metrics.read();
        let now = Instant::now();

        let mut eligible: Vec<&DriverMetrics> = guard
            .values()
            .filter(|m| !exclude.contains(&m.name))
            .filter(|m| m.eligible_at(now))
            .collect();

        let selection = match level {
            RaidLevel::Zero => {
                eligible.sort_by(|a, b| Self::throughput_order(a, b));
                let picked = Self::take_names(&eligible, 4);
                Self::require(level, &picked)?;
                Selection {
                    drivers: picked,
                    parity_index: None,
                }
            }
            RaidLevel::One => {
                eligible.sort_by(|a, b| Self::reliability_order(a, b));
                let picked = Self::take_names(&eligible, 2);
                Self::require(level, &picked)?;
                Selection {
                    drivers: picked,
                    parity_index: None,
                }
            }
            RaidLevel::Five => {
                eligible.sort_by(|a, b| {
                    self.composite_score(b)
                        .partial_cmp(&self.composite_score(a))
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.name.cmp(&b.name))
                });
                let picked = Self::take_names(&eligible, 5);
                Self::require(level, &picked)?;
                let parity_index = stripe_index % picked.len();
                Selection {
                    drivers: picked,
                    parity_index: Some(parity_index),
                }
            }
            RaidLevel::Ten => {
                eligible.sort_by(|a, b| Self::reliability_order(a, b));
                let mut picked = Self::take_names(&eligible, 8);
                if picked.len() % 2 != 0 {
                    picked.pop();
                }
                Self::require(level, &picked)?;
                Selection {
                    drivers: picked,
                    parity_index: None,
                }
            }
        };

        debug!(
            level = %level,
            stripe = stripe_index,
            drivers = ?selection.drivers,
            parity = ?selection.parity_index,
            "drivers selected"
        );
        Ok(selection)
    }

    fn require(level: RaidLevel, picked: &[String]) -> Result<()> {
        level.validate_driver_count(picked.len()).map_err(|_| {
            Error::config(format!(
                "{level}: only {} eligible drivers",
                picked.len()
            ))
        })
    }

    fn take_names(sorted: &[&DriverMetrics], cap: usize) -> Vec<String> {
        sorted
            .iter()
            .take(cap)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Ascending latency, then descending success rate
    fn throughput_order(a: &DriverMetrics, b: &DriverMetrics) -> Ordering {
        a.latency_or_default()
            .cmp(&b.latency_or_default())
            .then_with(|| {
                b.success_rate()
                    .partial_cmp(&a.success_rate())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.name.cmp(&b.name))
    }

    /// Descending success rate, then oldest error first (never-errored wins)
    fn reliability_order(a: &DriverMetrics, b: &DriverMetrics) -> Ordering {
        b.success_rate()
            .partial_cmp(&a.success_rate())
            .unwrap_or(Ordering::Equal)
            .then_with(|| match (a.last_error, b.last_error) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            })
            .then_with(|| a.name.cmp(&b.name))
    }

    fn composite_score(&self, m: &DriverMetrics) -> f64 {
        let latency_ms = m.latency_or_default().as_secs_f64() * 1000.0;
        let latency_score = 1.0 / (latency_ms + 1.0);
        let load_score = 1.0 / (f64::from(m.current_load) + 1.0);
        let space_score = m.free_bytes.min(FREE_SPACE_CAP) as f64 / FREE_SPACE_CAP as f64;

        self.weights.latency * latency_score
            + self.weights.success * m.success_rate()
            + self.weights.load * load_score
            + self.weights.space * space_score
    }

    /// Shift a driver's recorded last error back in time.
    ///
    /// Test hook for exercising the eligibility window without sleeping.
    #[doc(hidden)]
    pub fn rewind_last_error(&self, driver: &str, by: Duration) {
        let mut guard = self.metrics.write();
        if let Some(m) = guard.get_mut(driver) {
            if let Some(at) = m.last_error {
                m.last_error = at.checked_sub(by);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ERROR_COOLDOWN;
    use std::sync::Arc;
    use stripeio_common::ErrorKind;
    use stripeio_driver::{DriverRegistry, MemoryDriver, StorageDriver};

    fn registry(count: usize) -> Arc<DriverRegistry> {
        let drivers: Vec<Arc<dyn StorageDriver>> = (0..count)
            .map(|i| Arc::new(MemoryDriver::new(format!("d{i}"), None)) as Arc<dyn StorageDriver>)
            .collect();
        Arc::new(DriverRegistry::new(drivers).unwrap())
    }

    #[test]
    fn test_raid0_prefers_low_latency() {
        let scheduler = RaidScheduler::new(registry(5));
        // d3 is fast, d0 is slow, the rest are unmeasured (100 ms default).
        scheduler.record_operation("d3", true, Duration::from_millis(5));
        scheduler.record_operation("d0", true, Duration::from_millis(400));

        let sel = scheduler
            .select_for_stripe(RaidLevel::Zero, 0, &[])
            .unwrap();
        assert_eq!(sel.drivers.len(), 4);
        assert_eq!(sel.drivers[0], "d3");
        assert!(!sel.drivers.contains(&"d0".to_string()));
        assert_eq!(sel.parity_index, None);
    }

    #[test]
    fn test_raid1_takes_two_most_reliable() {
        let scheduler = RaidScheduler::new(registry(5));
        let sel = scheduler.select_for_stripe(RaidLevel::One, 0, &[]).unwrap();
        assert_eq!(sel.drivers.len(), 2);
        // Identical metrics fall back to name order.
        assert_eq!(sel.drivers, vec!["d0", "d1"]);
    }

    #[test]
    fn test_raid5_parity_rotation() {
        let scheduler = RaidScheduler::new(registry(5));
        let sel = scheduler
            .select_for_stripe(RaidLevel::Five, 3, &[])
            .unwrap();
        assert_eq!(sel.drivers.len(), 5);
        assert_eq!(sel.parity_index, Some(3));

        for stripe in 0..10 {
            let sel = scheduler
                .select_for_stripe(RaidLevel::Five, stripe, &[])
                .unwrap();
            assert_eq!(sel.parity_index, Some(stripe % sel.drivers.len()));
        }
    }

    #[test]
    fn test_failed_driver_excluded_within_cooldown() {
        let scheduler = RaidScheduler::new(registry(5));
        scheduler.record_operation("d2", false, Duration::from_millis(10));

        let sel = scheduler
            .select_for_stripe(RaidLevel::Five, 0, &[])
            .unwrap();
        assert_eq!(sel.drivers.len(), 4);
        assert!(!sel.drivers.contains(&"d2".to_string()));

        // Five minutes of simulated time later it is selectable again.
        scheduler.rewind_last_error("d2", ERROR_COOLDOWN + Duration::from_secs(1));
        let sel = scheduler
            .select_for_stripe(RaidLevel::Five, 0, &[])
            .unwrap();
        assert!(sel.drivers.contains(&"d2".to_string()));
    }

    #[test]
    fn test_caller_exclusions_respected() {
        let scheduler = RaidScheduler::new(registry(5));
        let sel = scheduler
            .select_for_stripe(RaidLevel::Zero, 0, &["d0".to_string(), "d1".to_string()])
            .unwrap();
        assert_eq!(sel.drivers, vec!["d2", "d3", "d4"]);
    }

    #[test]
    fn test_insufficient_drivers_is_config_error() {
        let scheduler = RaidScheduler::new(registry(2));
        let err = scheduler
            .select_for_stripe(RaidLevel::Five, 0, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_raid10_even_count() {
        let scheduler = RaidScheduler::new(registry(5));
        let sel = scheduler.select_for_stripe(RaidLevel::Ten, 0, &[]).unwrap();
        assert_eq!(sel.drivers.len(), 4);

        let scheduler = RaidScheduler::new(registry(7));
        let sel = scheduler.select_for_stripe(RaidLevel::Ten, 0, &[]).unwrap();
        assert_eq!(sel.drivers.len(), 6);
    }

    #[test]
    fn test_composite_score_ordering() {
        let scheduler = RaidScheduler::new(registry(3));
        // d1 accumulates load and an error; d0 stays clean.
        scheduler.record_operation("d0", true, Duration::from_millis(10));
        scheduler.record_operation("d1", false, Duration::from_millis(10));
        scheduler.rewind_last_error("d1", ERROR_COOLDOWN + Duration::from_secs(1));

        let a = scheduler.metrics_for("d0").unwrap();
        let b = scheduler.metrics_for("d1").unwrap();
        assert!(scheduler.composite_score(&a) > scheduler.composite_score(&b));
    }
}
