// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Latency summary of a run.
//!
//! Percentiles use the nearest-rank index `len * p / 100` over the sorted
//! samples, clamped to the last sample.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spread of per-request latencies. All zero for an empty run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyDistribution {
    /// Fastest request.
    pub min: Duration,
    /// Slowest request.
    pub max: Duration,
    /// Arithmetic mean.
    pub mean: Duration,
    /// Population standard deviation.
    pub std_dev: Duration,
    /// Median.
    pub p50: Duration,
    /// 90th percentile.
    pub p90: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// Requests measured.
    pub sample_count: usize,
}

impl LatencyDistribution {
    /// Summarize `samples`, in any order.
    pub fn from_samples(samples: &[Duration]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::default();
        };

        let count = sorted.len();
        let mean_nanos = sorted.iter().map(Duration::as_nanos).sum::<u128>() / count as u128;
        let squared_error: f64 = sorted
            .iter()
            .map(|d| (d.as_nanos() as f64 - mean_nanos as f64).powi(2))
            .sum();
        let std_dev_nanos = (squared_error / count as f64).sqrt();

        Self {
            min,
            max,
            mean: Duration::from_nanos(mean_nanos as u64),
            std_dev: Duration::from_nanos(std_dev_nanos as u64),
            p50: nearest_rank(&sorted, 50),
            p90: nearest_rank(&sorted, 90),
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
            sample_count: count,
        }
    }
}

fn nearest_rank(sorted: &[Duration], percent: usize) -> Duration {
    sorted[(sorted.len() * percent / 100).min(sorted.len() - 1)]
}

/// Rate of `count` events over `duration`, per second.
pub fn per_second(count: u64, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }
    count as f64 / duration.as_secs_f64()
}
