//! # Time Window
//!
//! A free-running clock that steps through a caller-supplied sequence of
//! values at a fixed wall-clock interval. Simulated endpoints read the current
//! value to decide how to behave ("current simulated time"); the batch runner
//! never consults it.
//!
//! The window is shared behind an `Arc` and read from many request tasks, so
//! its state is held in atomics rather than behind a lock.

use crate::error::ConfigError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub struct TimeWindow {
    values: Vec<u64>,
    interval: Duration,
    current_index: AtomicUsize,
    current_value: AtomicU64,
}

impl TimeWindow {
    /// Create a window positioned at the first value of `values`
    pub fn new(values: Vec<u64>, interval: Duration) -> Result<Self, ConfigError> {
        let first = *values.first().ok_or(ConfigError::EmptyTimeWindow)?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                name: "time window interval",
                value: interval,
            });
        }

        Ok(Self {
            values,
            interval,
            current_index: AtomicUsize::new(0),
            current_value: AtomicU64::new(first),
        })
    }

    /// Step to the next value.
    ///
    /// Returns `true` while the new index is still inside the sequence, which
    /// is the signal to schedule another step. Once the index runs past the
    /// end, the current value keeps the last valid entry and `false` is
    /// returned. The index itself is not clamped; readers that index into
    /// [`values`](Self::values) must bound their own reads.
    pub fn advance(&self) -> bool {
        let index = self.current_index.fetch_add(1, Ordering::AcqRel) + 1;
        match self.values.get(index) {
            Some(&value) => {
                self.current_value.store(value, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Run the window on its own timer until the sequence is exhausted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if !self.advance() {
                    debug!(
                        "Time window exhausted at index {}, holding value {}",
                        self.current_index(),
                        self.current_value()
                    );
                    break;
                }
                debug!(
                    "Time window advanced to index {} (value {})",
                    self.current_index(),
                    self.current_value()
                );
            }
        })
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::Acquire)
    }

    pub fn current_value(&self) -> u64 {
        self.current_value.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_index() >= self.values.len()
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
