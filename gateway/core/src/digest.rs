//! Merging t-digest
//!
//! Streaming quantile estimator used for the request latency model. Samples
//! are buffered and periodically merged into a sorted list of centroids whose
//! sizes are bounded by the arcsine scale function, which keeps the tails
//! (p99, p99.5) accurate while the middle of the distribution is compressed.
//!
//! ```text
//!   add(x) ──► buffer ──(full / quantile)──► merge ──► [c0 c1 ... cn]
//!                                                        sorted by mean
//! ```
//!
//! The digest is not synchronized; callers wrap it in a lock.

use std::f64::consts::PI;

/// Default compression, controls the centroid budget
pub const DEFAULT_COMPRESSION: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Centroid {
    mean: f64,
    weight: f64,
}

/// A merging t-digest over `f64` samples
#[derive(Debug, Clone)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    merged_weight: f64,
    buffer: Vec<f64>,
    buffer_limit: usize,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    /// Create an empty digest with the given compression (clamped to >= 20)
    pub fn new(compression: f64) -> Self {
        let compression = if compression.is_finite() {
            compression.max(20.0)
        } else {
            DEFAULT_COMPRESSION
        };
        Self {
            compression,
            centroids: Vec::new(),
            merged_weight: 0.0,
            buffer: Vec::new(),
            buffer_limit: (compression * 5.0) as usize,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Compression factor
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Add one sample; non-finite values are ignored
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_limit {
            self.merge_buffer();
        }
    }

    /// Total number of samples added
    pub fn count(&self) -> u64 {
        self.merged_weight as u64 + self.buffer.len() as u64
    }

    /// Whether no sample has been added
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty() && self.buffer.is_empty()
    }

    /// Number of centroids after merging pending samples
    pub fn centroid_count(&mut self) -> usize {
        self.merge_buffer();
        self.centroids.len()
    }

    /// Estimate the value at quantile `q` (clamped to `[0, 1]`)
    ///
    /// Returns `None` for an empty digest.
    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        self.merge_buffer();
        if self.centroids.is_empty() {
            return None;
        }
        let q = if q.is_nan() { 0.5 } else { q.clamp(0.0, 1.0) };

        let centroids = &self.centroids;
        if centroids.len() == 1 {
            return Some(centroids[0].mean);
        }

        let total = self.merged_weight;
        let index = q * total;

        let first = centroids[0];
        let first_half = first.weight / 2.0;
        if index <= first_half {
            return Some(self.min + (index / first_half) * (first.mean - self.min));
        }

        let last = centroids[centroids.len() - 1];
        let last_half = last.weight / 2.0;
        if index >= total - last_half {
            let tail = total - index;
            return Some(self.max - (tail / last_half) * (self.max - last.mean));
        }

        // Interpolate between neighbouring centroid centres
        let mut cumulative = first_half;
        for pair in centroids.windows(2) {
            let step = (pair[0].weight + pair[1].weight) / 2.0;
            if index <= cumulative + step {
                let fraction = (index - cumulative) / step;
                return Some(pair[0].mean + fraction * (pair[1].mean - pair[0].mean));
            }
            cumulative += step;
        }

        Some(last.mean)
    }

    fn merge_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut all: Vec<Centroid> = Vec::with_capacity(self.centroids.len() + self.buffer.len());
        all.append(&mut self.centroids);
        all.extend(self.buffer.drain(..).map(|mean| Centroid { mean, weight: 1.0 }));
        all.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total: f64 = all.iter().map(|c| c.weight).sum();
        let mut merged = Vec::with_capacity(all.len());
        let mut iter = all.into_iter();
        let Some(mut current) = iter.next() else {
            return;
        };

        let mut weight_before = 0.0;
        let mut limit = self.q_limit(0.0);

        for next in iter {
            let proposed = current.weight + next.weight;
            if (weight_before + proposed) / total <= limit {
                current.mean += (next.mean - current.mean) * next.weight / proposed;
                current.weight = proposed;
            } else {
                weight_before += current.weight;
                merged.push(current);
                limit = self.q_limit(weight_before / total);
                current = next;
            }
        }
        merged.push(current);

        self.centroids = merged;
        self.merged_weight = total;
    }

    /// Largest quantile a centroid starting at `q0` may extend to
    fn q_limit(&self, q0: f64) -> f64 {
        let k = self.compression / (2.0 * PI) * (2.0 * q0 - 1.0).clamp(-1.0, 1.0).asin();
        let angle = (k + 1.0) * 2.0 * PI / self.compression;
        if angle >= PI / 2.0 {
            1.0
        } else {
            (angle.sin() + 1.0) / 2.0
        }
    }
}
