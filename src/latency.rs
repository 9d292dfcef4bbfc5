//! Latency sample accumulation.

use std::time::Duration;

use serde::Serialize;

/// Min/max/average over a set of samples, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Append-only store of raw latency samples (milliseconds).
///
/// Keeps every sample so that merging recorders stays exact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyRecorder {
    samples: Vec<f64>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample.as_nanos() as f64 / 1_000_000.0);
    }

    /// Records a sample already expressed in milliseconds. Negative or
    /// non-finite values are clamped to zero.
    pub fn record_ms(&mut self, ms: f64) {
        let ms = if ms.is_finite() && ms > 0.0 { ms } else { 0.0 };
        self.samples.push(ms);
    }

    /// Appends another recorder's raw samples.
    pub fn merge(&mut self, other: &LatencyRecorder) {
        self.samples.extend_from_slice(&other.samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// `{0, 0, 0}` when empty.
    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut sum = 0.0;
        for &s in &self.samples {
            min = min.min(s);
            max = max.max(s);
            sum += s;
        }
        LatencySummary {
            min,
            max,
            avg: sum / self.samples.len() as f64,
        }
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`. Returns 0 when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[percentile_index(sorted.len(), p)]
    }
}

/// `ceil(p/100 * len) - 1`, clamped to the valid range.
fn percentile_index(len: usize, p: f64) -> usize {
    let p = p.clamp(0.0, 100.0);
    let rank = (p * len as f64 / 100.0).ceil() as usize;
    rank.saturating_sub(1).min(len - 1)
}
