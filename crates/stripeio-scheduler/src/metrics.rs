//! Per-driver running metrics
//!
//! The success rate models a sliding window of 100 notional operations:
//! a success bumps the window counter (capped at 100), a failure drops it
//! (floored at 0), so the rate is always `counter / 100`.

use std::time::{Duration, Instant};

/// Window size for the notional success-rate counter
pub const SUCCESS_WINDOW: u32 = 100;

/// EWMA smoothing factor for latency
pub const LATENCY_ALPHA: f64 = 0.1;

/// Latency assumed for a driver that has never been measured
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// How long a driver stays ineligible after an error
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Minimum success rate for eligibility
pub const MIN_SUCCESS_RATE: f64 = 0.8;

/// Running quality metrics for one driver
#[derive(Clone, Debug)]
pub struct DriverMetrics {
    pub name: String,
    /// Smoothed latency; `None` until the first observation seeds it
    pub avg_latency: Option<Duration>,
    success_window: u32,
    pub current_load: u32,
    pub free_bytes: u64,
    pub last_error: Option<Instant>,
}

impl DriverMetrics {
    /// Fresh metrics for a newly registered driver
    #[must_use]
    pub fn seed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avg_latency: None,
            success_window: SUCCESS_WINDOW,
            current_load: 0,
            free_bytes: 0,
            last_error: None,
        }
    }

    /// Rolling success rate in `[0, 1]`
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        f64::from(self.success_window) / f64::from(SUCCESS_WINDOW)
    }

    /// Smoothed latency, falling back to the unmeasured default
    #[must_use]
    pub fn latency_or_default(&self) -> Duration {
        self.avg_latency.unwrap_or(DEFAULT_LATENCY)
    }

    /// Fold one operation outcome into the metrics
    pub fn record(&mut self, success: bool, latency: Duration, now: Instant) {
        self.avg_latency = Some(match self.avg_latency {
            None => latency,
            Some(avg) => {
                let blended = avg.as_secs_f64() * (1.0 - LATENCY_ALPHA)
                    + latency.as_secs_f64() * LATENCY_ALPHA;
                Duration::from_secs_f64(blended)
            }
        });

        if success {
            self.success_window = (self.success_window + 1).min(SUCCESS_WINDOW);
            self.current_load = self.current_load.saturating_sub(1);
        } else {
            self.success_window = self.success_window.saturating_sub(1);
            self.current_load = (self.current_load + 1).min(100);
            self.last_error = Some(now);
        }
    }

    /// Knock the success window down by `ops` notional operations
    /// (used by the health probe when a driver stops answering)
    pub fn degrade(&mut self, ops: u32, now: Instant) {
        self.success_window = self.success_window.saturating_sub(ops);
        self.last_error = Some(now);
    }

    /// Whether this driver may be selected at instant `now`
    #[must_use]
    pub fn eligible_at(&self, now: Instant) -> bool {
        if self.success_rate() <= MIN_SUCCESS_RATE {
            return false;
        }
        match self.last_error {
            None => true,
            Some(at) => now.duration_since(at) > ERROR_COOLDOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_values() {
        let m = DriverMetrics::seed("d0");
        assert!(m.avg_latency.is_none());
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.current_load, 0);
        assert!(m.last_error.is_none());
        assert!(m.eligible_at(Instant::now()));
    }

    #[test]
    fn test_first_observation_seeds_latency() {
        let mut m = DriverMetrics::seed("d0");
        m.record(true, Duration::from_millis(40), Instant::now());
        assert_eq!(m.avg_latency, Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_ewma_blending() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();
        m.record(true, Duration::from_millis(100), now);
        m.record(true, Duration::from_millis(200), now);
        // 100 * 0.9 + 200 * 0.1 = 110
        assert_eq!(m.avg_latency, Some(Duration::from_millis(110)));
    }

    #[test]
    fn test_success_window_bounds() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();

        // Already at the cap: successes keep it there.
        m.record(true, Duration::from_millis(1), now);
        assert_eq!(m.success_rate(), 1.0);

        for _ in 0..150 {
            m.record(false, Duration::from_millis(1), now);
        }
        assert_eq!(m.success_rate(), 0.0);

        for _ in 0..30 {
            m.record(true, Duration::from_millis(1), now);
        }
        assert!((m.success_rate() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_counter() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();
        m.record(false, Duration::from_millis(1), now);
        m.record(false, Duration::from_millis(1), now);
        assert_eq!(m.current_load, 2);
        m.record(true, Duration::from_millis(1), now);
        assert_eq!(m.current_load, 1);
        m.record(true, Duration::from_millis(1), now);
        m.record(true, Duration::from_millis(1), now);
        assert_eq!(m.current_load, 0);
    }

    #[test]
    fn test_monotone_success_stays_eligible() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();
        let mut prev = m.success_rate();
        for _ in 0..20 {
            m.record(true, Duration::from_millis(5), now);
            assert!(m.success_rate() >= prev);
            assert!(m.success_rate() <= 1.0);
            prev = m.success_rate();
        }
        assert!(m.eligible_at(now));
    }

    #[test]
    fn test_error_cooldown() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();
        m.record(false, Duration::from_millis(5), now);
        assert!(!m.eligible_at(now));
        assert!(!m.eligible_at(now + Duration::from_secs(299)));
        assert!(m.eligible_at(now + ERROR_COOLDOWN + Duration::from_secs(1)));
    }

    #[test]
    fn test_degrade() {
        let mut m = DriverMetrics::seed("d0");
        let now = Instant::now();
        m.degrade(10, now);
        assert!((m.success_rate() - 0.9).abs() < f64::EPSILON);
        assert_eq!(m.last_error, Some(now));
        for _ in 0..12 {
            m.degrade(10, now);
        }
        assert_eq!(m.success_rate(), 0.0);
    }
}
