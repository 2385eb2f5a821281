//! # Bucket Aggregation
//!
//! A run's time axis is divided into buckets. Each bucket spans a fixed number
//! of consecutive batches and owns one [`BucketResult`], which folds the
//! outcomes of every request dispatched while that bucket was active into
//! counts and a latency distribution.
//!
//! ## Invariants
//!
//! - `total_count == success_count + error_count`
//! - the values of `by_error_type` sum to `error_count`
//! - every recorded outcome contributes one latency sample, failures included

use crate::error::ConfigError;
use crate::metrics::{LatencyHistogram, LatencySummary, MemorySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Timeout,
    Declined,
    Busy,
    Connection,
    Protocol,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Declined => "declined",
            ErrorKind::Busy => "busy",
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one completed request.
///
/// Produced by the client when a request finishes (or times out) and consumed
/// once by the bucket that was active when the request was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub error: Option<ErrorKind>,
    pub response_ok: bool,
    pub duration: Duration,
}

impl RequestOutcome {
    pub fn success(duration: Duration) -> Self {
        Self {
            error: None,
            response_ok: true,
            duration,
        }
    }

    pub fn failure(kind: ErrorKind, duration: Duration) -> Self {
        Self {
            error: Some(kind),
            response_ok: false,
            duration,
        }
    }

    /// Duration in whole milliseconds, rounded up like the latency percentiles
    pub fn duration_millis(&self) -> u64 {
        u64::try_from(self.duration.as_micros())
            .unwrap_or(u64::MAX)
            .div_ceil(1000)
    }
}

/// Per-bucket aggregate of request outcomes
#[derive(Debug, Clone)]
pub struct BucketResult {
    pub index: usize,
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub declined_count: u64,
    /// Responses that arrived without a transport error but with `ok == false`.
    /// Counted as successes as well; informational only.
    pub not_ok_count: u64,
    pub by_error_type: BTreeMap<ErrorKind, u64>,
    pub latency: LatencyHistogram,
    pub memory: Option<MemorySnapshot>,
}

impl BucketResult {
    pub fn new(index: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            index,
            total_count: 0,
            success_count: 0,
            error_count: 0,
            timeout_count: 0,
            declined_count: 0,
            not_ok_count: 0,
            by_error_type: BTreeMap::new(),
            latency: LatencyHistogram::new()?,
            memory: None,
        })
    }

    /// Mark the bucket as active. Takes the memory snapshot on first call.
    pub fn touch(&mut self) {
        if self.memory.is_none() {
            self.memory = Some(MemorySnapshot::capture());
        }
    }

    /// Fold one outcome into the bucket
    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.total_count += 1;

        match outcome.error {
            Some(kind) => {
                self.error_count += 1;
                *self.by_error_type.entry(kind).or_insert(0) += 1;
                match kind {
                    ErrorKind::Timeout => self.timeout_count += 1,
                    ErrorKind::Declined => self.declined_count += 1,
                    _ => {}
                }
            }
            None => {
                self.success_count += 1;
                if !outcome.response_ok {
                    self.not_ok_count += 1;
                }
            }
        }

        self.latency.record(outcome.duration);
    }

    /// Fraction of recorded requests that failed, 0.0 for an empty bucket
    pub fn error_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_count as f64
        }
    }

    pub fn summary(&self) -> BucketSummary {
        BucketSummary {
            index: self.index,
            total_count: self.total_count,
            success_count: self.success_count,
            error_count: self.error_count,
            timeout_count: self.timeout_count,
            declined_count: self.declined_count,
            not_ok_count: self.not_ok_count,
            by_error_type: self.by_error_type.clone(),
            latency: self.latency.summary(),
            memory: self.memory.clone(),
        }
    }
}

/// Serializable view of a [`BucketResult`], the structure assertions and
/// reports are written against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub index: usize,
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub declined_count: u64,
    pub not_ok_count: u64,
    pub by_error_type: BTreeMap<ErrorKind, u64>,
    pub latency: LatencySummary,
    pub memory: Option<MemorySnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_outcome_duration_millis_rounds_up() {
        assert_eq!(RequestOutcome::success(ms(10)).duration_millis(), 10);
        let partial = RequestOutcome::failure(ErrorKind::Timeout, Duration::from_micros(10_900));
        assert_eq!(partial.duration_millis(), 11);
    }

    #[test]
    fn test_bucket_counts_success_and_errors() {
        let mut bucket = BucketResult::new(0).unwrap();
        bucket.record(&RequestOutcome::success(ms(5)));
        bucket.record(&RequestOutcome::success(ms(7)));
        bucket.record(&RequestOutcome::failure(ErrorKind::Timeout, ms(100)));
        bucket.record(&RequestOutcome::failure(ErrorKind::Declined, ms(1)));
        bucket.record(&RequestOutcome::failure(ErrorKind::Timeout, ms(100)));

        assert_eq!(bucket.total_count, 5);
        assert_eq!(bucket.success_count, 2);
        assert_eq!(bucket.error_count, 3);
        assert_eq!(bucket.timeout_count, 2);
        assert_eq!(bucket.declined_count, 1);
        assert_eq!(bucket.by_error_type.get(&ErrorKind::Timeout), Some(&2));
        assert_eq!(bucket.by_error_type.get(&ErrorKind::Declined), Some(&1));
        assert_eq!(
            bucket.by_error_type.values().sum::<u64>(),
            bucket.error_count
        );
        assert_eq!(bucket.total_count, bucket.success_count + bucket.error_count);
    }

    #[test]
    fn test_bucket_records_latency_for_failures() {
        let mut bucket = BucketResult::new(3).unwrap();
        bucket.record(&RequestOutcome::failure(ErrorKind::Connection, ms(42)));

        let summary = bucket.summary();
        assert_eq!(summary.index, 3);
        assert_eq!(summary.latency.samples, 1);
        assert_eq!(summary.latency.max, 42);
    }

    #[test]
    fn test_bucket_not_ok_response_counts_as_success() {
        let mut bucket = BucketResult::new(0).unwrap();
        let outcome = RequestOutcome {
            error: None,
            response_ok: false,
            duration: ms(3),
        };
        bucket.record(&outcome);

        assert_eq!(bucket.success_count, 1);
        assert_eq!(bucket.not_ok_count, 1);
        assert_eq!(bucket.error_count, 0);
    }

    #[test]
    fn test_bucket_touch_snapshots_once() {
        let mut bucket = BucketResult::new(0).unwrap();
        assert!(bucket.memory.is_none());

        bucket.touch();
        let first = bucket.memory.clone();
        assert!(first.is_some());

        bucket.touch();
        assert_eq!(bucket.memory, first);
    }

    #[test]
    fn test_error_rate() {
        let mut bucket = BucketResult::new(0).unwrap();
        assert_eq!(bucket.error_rate(), 0.0);
        bucket.record(&RequestOutcome::success(ms(1)));
        bucket.record(&RequestOutcome::failure(ErrorKind::Busy, ms(1)));
        assert!((bucket.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_kind_serializes_kebab_case() {
        let mut map = BTreeMap::new();
        map.insert(ErrorKind::Timeout, 4u64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"timeout":4}"#);
    }
}
