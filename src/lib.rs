//! # RPC Batch Benchmark Library
//!
//! A batch load generator and measurement harness for request/response
//! services. A run fires fixed-size batches of concurrent requests on a
//! steady cadence, groups consecutive batches into time buckets, and reports
//! latency percentiles and error counts per bucket. Comparing buckets shows
//! how a service behaves as conditions change during the run.
//!
//! ## Run Shape
//!
//! A run is `num_buckets * batches_per_bucket * requests_per_batch` requests.
//! Batch `n` is dispatched at `start + n * client_batch_delay` and belongs to
//! bucket `n / batches_per_bucket`. Requests are attributed to the bucket that
//! was active when they were sent, even when the response arrives later.
//!
//! ## Architecture Overview
//!
//! - `client`: Run configuration and the `LoadClient` entry point
//! - `runner`: The `BatchRunner` scheduling loop
//! - `bucket`: Per-bucket counters, error classification and summaries
//! - `metrics`: HDR latency histograms and process memory snapshots
//! - `channel`: The `Channel` abstraction with simulated and TCP backends
//! - `time_window`: A stepped value source for time-varying test conditions
//! - `results`: JSON report and console summary table
//! - `cli`, `logging`, `utils`: Binary plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rpc_batch_benchmark::{
//!     channel::{Channel, ChannelPool, SimulatedChannel, SimulatedEndpoint},
//!     LoadClient, RunConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::builder()
//!         .num_buckets(2)
//!         .batches_per_bucket(3)
//!         .requests_per_batch(4)
//!         .client_batch_delay(Duration::from_millis(100))
//!         .endpoint("echo")
//!         .build()?;
//!
//!     let channel = SimulatedChannel::new(
//!         "sim-0",
//!         SimulatedEndpoint::Delay(Duration::from_millis(10)),
//!     );
//!     let pool = ChannelPool::new(vec![Arc::new(channel) as Arc<dyn Channel>])?;
//!
//!     let client = Arc::new(LoadClient::new(config, pool)?);
//!     let results = client.start_run(tokio::time::Instant::now()).await?;
//!
//!     for bucket in results.summaries() {
//!         println!("bucket {}: p99 {}ms", bucket.index, bucket.latency.p99);
//!     }
//!     Ok(())
//! }
//! ```

/// Per-bucket aggregation
///
/// Counters, error classification and the per-bucket latency histogram.
pub mod bucket;

/// Request channels
///
/// The `Channel` trait every backend implements, the random-choice
/// `ChannelPool`, and the simulated and TCP implementations.
pub mod channel;

pub mod cli;

/// Load client and run configuration
pub mod client;

pub mod error;

pub mod logging;

/// Latency histograms and memory snapshots
///
/// Latency is recorded in whole milliseconds into an HDR histogram so that
/// percentile lookups are constant-cost and monotonic.
pub mod metrics;

/// Report output
///
/// Manages the JSON report written at the end of a run and the summary table
/// printed to the console:
/// - Run metadata (version, run id, timestamp, host information)
/// - The effective configuration
/// - One summary per bucket plus run totals
pub mod results;

/// Batch scheduling
pub mod runner;

pub mod time_window;

pub mod utils;

// Re-export key types for convenient library usage

/// Run entry point and configuration
pub use client::{LoadClient, RunConfig, RunConfigBuilder, RunResults};

/// The runner itself, for callers that drive a run step by step
pub use runner::{BatchRunner, RunState};

pub use bucket::{BucketResult, BucketSummary, ErrorKind, RequestOutcome};

pub use channel::{Channel, ChannelPool, RequestOptions, Response};

pub use error::{CallError, ConfigError, DispatchError, RunError};

pub use metrics::{LatencyHistogram, LatencySummary, MemorySnapshot};

pub use results::{ResultsManager, RunReport};

pub use time_window::TimeWindow;

pub use cli::Args;

/// The current version of the benchmark
///
/// Populated from Cargo.toml and recorded in every report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Used by both the CLI and [`RunConfigBuilder`] when a parameter is not set.
pub mod defaults {
    use std::time::Duration;

    /// Default number of time buckets
    pub const NUM_BUCKETS: usize = 4;

    /// Default number of batches per bucket
    ///
    /// With the default batch delay, ten batches put one bucket at roughly
    /// one second of wall-clock time.
    pub const BATCHES_PER_BUCKET: usize = 10;

    /// Default number of concurrent requests per batch
    pub const REQUESTS_PER_BATCH: usize = 10;

    /// Default spacing between batch dispatches
    pub const CLIENT_BATCH_DELAY: Duration = Duration::from_millis(100);

    /// Default per-request timeout
    pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

    /// Default endpoint
    pub const ENDPOINT: &str = "echo";

    /// Default number of channels in the pool
    pub const CHANNELS: usize = 4;

    /// Default output file name
    pub const OUTPUT_FILE: &str = "batch_results.json";

    /// Default time window step interval
    pub const TIME_WINDOW_INTERVAL: Duration = Duration::from_secs(1);
}
