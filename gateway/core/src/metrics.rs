//! Gateway Metrics
//!
//! Observability primitives shared by the pipeline stages:
//! - Lock-free counters and gauges for pool, limiter and watchdog activity
//! - The request latency model backing the dynamic slow-query threshold

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::digest::{TDigest, DEFAULT_COMPRESSION};

/// Quantiles reported by [`LatencyModel::snapshot`]
pub const STANDARD_QUANTILES: [f64; 9] = [0.005, 0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.99, 0.995];

/// Snapshot label carrying the sample count
pub const SAMPLES_LABEL: &str = "samples";

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// A gauge (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a gauge at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement, saturating at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Latency Model
// ============================================================================

struct LatencyState {
    digest: TDigest,
    samples: u64,
}

/// Streaming model of completed request latencies (milliseconds)
///
/// One coarse lock guards the digest and the sample counter together, so a
/// reset is never observed half-applied.
pub struct LatencyModel {
    compression: f64,
    state: Mutex<LatencyState>,
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyModel {
    /// Create an empty model with the default compression
    pub fn new() -> Self {
        Self::with_compression(DEFAULT_COMPRESSION)
    }

    /// Create an empty model with a custom digest compression
    pub fn with_compression(compression: f64) -> Self {
        Self {
            compression,
            state: Mutex::new(LatencyState {
                digest: TDigest::new(compression),
                samples: 0,
            }),
        }
    }

    /// Record one completed request; non-finite latencies are dropped
    pub fn record(&self, latency_ms: f64) {
        if !latency_ms.is_finite() {
            return;
        }
        let mut state = self.state.lock();
        state.digest.add(latency_ms);
        state.samples += 1;
    }

    /// Number of samples recorded since creation or the last reset
    pub fn sample_count(&self) -> u64 {
        self.state.lock().samples
    }

    /// Approximate latency at quantile `q`; `None` while empty
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.state.lock().digest.quantile(q)
    }

    /// Standard quantiles plus the sample count
    ///
    /// Quantile entries are keyed by their decimal form (`"0.995"`); they are
    /// omitted while the model is empty.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        let mut state = self.state.lock();
        let mut snapshot = BTreeMap::new();
        for q in STANDARD_QUANTILES {
            if let Some(value) = state.digest.quantile(q) {
                snapshot.insert(format!("{q}"), value);
            }
        }
        snapshot.insert(SAMPLES_LABEL.to_string(), state.samples as f64);
        snapshot
    }

    /// Discard every sample
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.digest = TDigest::new(self.compression);
        state.samples = 0;
    }
}

// ============================================================================
// Process Usage
// ============================================================================

/// Resident memory and thread count of this process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessUsage {
    /// Resident set size in KiB
    pub resident_kb: Option<u64>,
    /// OS threads
    pub threads: Option<u64>,
}

impl ProcessUsage {
    /// Read the current process from `/proc/self/status`
    #[cfg(target_os = "linux")]
    pub fn sample() -> Self {
        std::fs::read_to_string("/proc/self/status")
            .map(|status| Self::parse_status(&status))
            .unwrap_or_default()
    }

    /// Not available on this platform; both fields are `None`
    #[cfg(not(target_os = "linux"))]
    pub fn sample() -> Self {
        Self::default()
    }

    /// Pick the `VmRSS` and `Threads` lines out of a proc status file
    pub fn parse_status(status: &str) -> Self {
        let mut usage = Self::default();
        for line in status.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let number = value.split_whitespace().next().and_then(|v| v.parse().ok());
            match key {
                "VmRSS" => usage.resident_kb = number,
                "Threads" => usage.threads = number,
                _ => {}
            }
        }
        usage
    }
}
