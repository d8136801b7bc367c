//! Stripeio Scheduler - Adaptive driver selection
//!
//! Tracks running quality metrics for every registered driver (smoothed
//! latency, rolling success rate, load, free space) and picks the driver
//! set for each stripe according to the RAID level: throughput-sorted for
//! RAID 0, reliability-sorted for RAID 1 and 10, composite-scored with
//! rotating parity for RAID 5. A background probe keeps the metrics and
//! the catalog's health table in touch with reality.

pub mod metrics;
pub mod probe;
mod scheduler;

pub use metrics::DriverMetrics;
pub use probe::{spawn_health_probe, HealthProbeConfig};
pub use scheduler::{RaidScheduler, ScoreWeights, Selection};
