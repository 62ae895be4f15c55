//! Removal latency collector: a histogram per removal cause.
//!
//! Uses a lock-free design: every bucket, the sample count and the sum are
//! atomics, so `record_removal` never waits, even when the tracker and a
//! scrape race.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::TimeDelta;
use serde::Serialize;
use tracing::debug;

use scaledown_core::config::default_buckets;
use scaledown_core::{ConfigResult, RemovalCause, RemovalLatencyRecorder, ScaledownConfig};

/// Histogram state for one cause.
struct CauseSeries {
    /// Non-cumulative per-bucket counts; cumulated at snapshot time.
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicI64,
}

impl CauseSeries {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicI64::new(0),
        }
    }
}

/// Point-in-time view of one cause's histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalLatencySnapshot {
    pub cause: RemovalCause,
    /// `(upper_bound_seconds, cumulative_count)`, ascending bounds.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum_seconds: f64,
}

/// Collects node removal latency samples recorded by the tracker.
pub struct RemovalLatencyCollector {
    bounds: Vec<f64>,
    series: [CauseSeries; 2],
}

impl RemovalLatencyCollector {
    /// Create a collector with the given bucket upper bounds in seconds.
    ///
    /// Bounds are expected to be strictly increasing, as validated by
    /// [`ScaledownConfig::histogram_buckets`].
    pub fn new(bounds: Vec<f64>) -> Self {
        let series = [CauseSeries::new(bounds.len()), CauseSeries::new(bounds.len())];
        debug!(buckets = bounds.len(), "removal latency collector created");
        Self { bounds, series }
    }

    pub fn from_config(config: &ScaledownConfig) -> ConfigResult<Self> {
        Ok(Self::new(config.histogram_buckets()?))
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Snapshot both causes, actuator-initiated first.
    pub fn snapshot(&self) -> Vec<RemovalLatencySnapshot> {
        RemovalCause::ALL
            .iter()
            .map(|&cause| {
                let series = &self.series[series_index(cause)];
                let mut cumulative = 0u64;
                let buckets = self
                    .bounds
                    .iter()
                    .zip(&series.buckets)
                    .map(|(&bound, count)| {
                        cumulative += count.load(Ordering::Relaxed);
                        (bound, cumulative)
                    })
                    .collect();

                RemovalLatencySnapshot {
                    cause,
                    buckets,
                    count: series.count.load(Ordering::Relaxed),
                    sum_seconds: series.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                }
            })
            .collect()
    }

    /// Samples recorded so far for `cause`.
    pub fn count(&self, cause: RemovalCause) -> u64 {
        self.series[series_index(cause)].count.load(Ordering::Relaxed)
    }
}

impl Default for RemovalLatencyCollector {
    fn default() -> Self {
        Self::new(default_buckets())
    }
}

impl RemovalLatencyRecorder for RemovalLatencyCollector {
    fn record_removal(&self, cause: RemovalCause, latency: TimeDelta) {
        let micros = latency
            .num_microseconds()
            .unwrap_or(if latency < TimeDelta::zero() { i64::MIN } else { i64::MAX });
        let seconds = micros as f64 / 1_000_000.0;
        let series = &self.series[series_index(cause)];

        // Lowest bucket whose bound holds the sample; negatives land in the first.
        if let Some(idx) = self.bounds.iter().position(|&bound| seconds <= bound) {
            series.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        series.count.fetch_add(1, Ordering::Relaxed);
        let _ = series
            .sum_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |sum| {
                Some(sum.saturating_add(micros))
            });
    }
}

fn series_index(cause: RemovalCause) -> usize {
    match cause {
        RemovalCause::ActuatorInitiated => 0,
        RemovalCause::NotActuatorInitiated => 1,
    }
}
