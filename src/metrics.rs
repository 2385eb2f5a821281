//! Latency histograms and process memory snapshots for bucket summaries.

use crate::error::ConfigError;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::warn;

/// Highest latency the histogram tracks, in milliseconds (1 hour).
/// Larger samples are clamped to this value.
const MAX_TRACKABLE_MS: u64 = 3_600_000;

const MAX_TRACKABLE_US: u64 = MAX_TRACKABLE_MS * 1000;

/// Latency distribution summary in whole milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub min: u64,
    pub median: u64,
    pub p75: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub mean: f64,
}

/// Latency sample accumulator backed by an HDR histogram.
///
/// Samples are taken at microsecond precision and reported in whole
/// milliseconds:
///
/// - `median`, `p75`, `p95` and `p99` are rounded up, so a percentile never
///   falls below the sample it stands for (10.9ms reports as 11).
/// - `max` is the largest sample rounded up.
/// - `min` is the smallest sample truncated, so `min <= median` always holds.
/// - `mean` is the exact mean in fractional milliseconds.
///
/// The histogram itself holds each sample rounded up to a whole millisecond,
/// which keeps every value below 2048ms exact at 3 significant figures.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
    min_us: u64,
    max_us: u64,
    sum_us: u128,
}

impl LatencyHistogram {
    pub fn new() -> Result<Self, ConfigError> {
        let histogram = Histogram::<u64>::new_with_bounds(1, MAX_TRACKABLE_MS, 3)
            .map_err(|e| ConfigError::Histogram(e.to_string()))?;
        Ok(Self {
            histogram,
            min_us: 0,
            max_us: 0,
            sum_us: 0,
        })
    }

    /// Record one latency sample
    pub fn record(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros())
            .unwrap_or(u64::MAX)
            .min(MAX_TRACKABLE_US);

        if self.is_empty() {
            self.min_us = micros;
            self.max_us = micros;
        } else {
            self.min_us = self.min_us.min(micros);
            self.max_us = self.max_us.max(micros);
        }
        self.sum_us += u128::from(micros);
        self.histogram.saturating_record(micros.div_ceil(1000));
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Smallest sample, truncated to whole milliseconds
    pub fn min(&self) -> u64 {
        self.min_us / 1000
    }

    /// Largest sample, rounded up to whole milliseconds
    pub fn max(&self) -> u64 {
        self.max_us.div_ceil(1000)
    }

    /// Value at `percentile` (0-100) in whole milliseconds, rounded up
    pub fn percentile(&self, percentile: f64) -> u64 {
        // Above 2048ms the bucket's highest equivalent can overshoot the largest sample.
        self.histogram
            .value_at_percentile(percentile)
            .min(self.max())
    }

    /// Mean of all samples in fractional milliseconds
    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.sum_us as f64 / self.len() as f64 / 1000.0
    }

    pub fn summary(&self) -> LatencySummary {
        if self.is_empty() {
            return LatencySummary::default();
        }

        LatencySummary {
            samples: self.len(),
            min: self.min(),
            median: self.percentile(50.0),
            p75: self.percentile(75.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
            max: self.max(),
            mean: self.mean(),
        }
    }
}

/// Process memory usage captured at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

impl MemorySnapshot {
    /// Sample the current process.
    ///
    /// The snapshot is informational; if the process cannot be inspected the
    /// byte counts are zero.
    pub fn capture() -> Self {
        let (rss_bytes, virtual_bytes) = match sysinfo::get_current_pid() {
            Ok(pid) => sample_process_memory(pid).unwrap_or_default(),
            Err(e) => {
                warn!("Unable to determine current pid for memory snapshot: {}", e);
                (0, 0)
            }
        };

        Self {
            rss_bytes,
            virtual_bytes,
            taken_at: chrono::Utc::now(),
        }
    }
}

fn sample_process_memory(pid: Pid) -> Option<(u64, u64)> {
    let mut sys = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory()),
    );
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
    sys.process(pid).map(|p| (p.memory(), p.virtual_memory()))
}
