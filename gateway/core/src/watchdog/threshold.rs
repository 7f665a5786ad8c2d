//! Slow-query threshold
//!
//! Static mode always answers the configured ceiling. Dynamic mode answers
//! the ceiling until [`MIN_SAMPLES`] latencies were recorded, then
//! `clamp(quantile, floor, ceiling)`, recomputed at most once per
//! [`RECOMPUTE_INTERVAL`] new samples. The cached value is shared by all
//! callers; a compare-and-set on the sample mark picks the one that
//! recomputes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::WatchdogConfig;
use crate::metrics::LatencyModel;

/// Samples required before the dynamic threshold is used
pub const MIN_SAMPLES: u64 = 50;

/// New samples between two recomputations
pub const RECOMPUTE_INTERVAL: u64 = 100;

/// Computes the threshold assigned to new timers
pub struct ThresholdPolicy {
    ceiling: Duration,
    floor: Duration,
    dynamic: bool,
    quantile: f64,
    latency: Arc<LatencyModel>,
    cached_ms: AtomicU64,
    computed_at: AtomicU64,
}

impl ThresholdPolicy {
    /// Build from watchdog settings and the shared latency model
    pub fn new(config: &WatchdogConfig, latency: Arc<LatencyModel>) -> Self {
        let ceiling = config.slow_query_threshold;
        Self {
            ceiling,
            floor: config.dynamic_floor.max(Duration::from_millis(1)),
            dynamic: config.dynamic_threshold,
            quantile: config.slowest_quantile,
            latency,
            cached_ms: AtomicU64::new(duration_ms(ceiling)),
            computed_at: AtomicU64::new(0),
        }
    }

    /// Static threshold and dynamic ceiling
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Threshold for a timer created now
    pub fn current(&self) -> Duration {
        if !self.dynamic {
            return self.ceiling;
        }

        let samples = self.latency.sample_count();
        if samples < MIN_SAMPLES {
            return self.ceiling;
        }

        let mark = self.computed_at.load(Ordering::Acquire);
        let stale = mark == 0 || samples < mark || mark + RECOMPUTE_INTERVAL < samples;
        if stale
            && self
                .computed_at
                .compare_exchange(mark, samples, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            if let Some(estimate) = self.latency.quantile(self.quantile) {
                let clamped = estimate
                    .max(duration_ms(self.floor) as f64)
                    .min(duration_ms(self.ceiling) as f64);
                self.cached_ms.store(clamped.round() as u64, Ordering::Release);
                debug!(
                    samples,
                    estimate_ms = estimate,
                    threshold_ms = clamped,
                    "Dynamic slow-query threshold recomputed"
                );
            }
        }

        Duration::from_millis(self.cached_ms.load(Ordering::Acquire))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
