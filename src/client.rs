//! # Load Client
//!
//! The load client owns everything a run needs that does not change while the
//! run is in progress: the run shape, the request template and the channel
//! pool. It exposes the single entry point for starting a run and the
//! primitive the batch runner uses to fan requests out.
//!
//! ## Error Handling
//!
//! Per-request failures (timeouts, connection errors, declined requests) are
//! captured into the request's [`RequestOutcome`] and never surface as errors.
//! Only a failure to dispatch at all is reported to the caller, and it ends
//! the run.

use crate::{
    bucket::{BucketResult, BucketSummary, ErrorKind, RequestOutcome},
    channel::{ChannelPool, RequestOptions},
    cli::Args,
    error::{ConfigError, DispatchError, RunError},
    runner::BatchRunner,
    utils::{validate_positive, validate_timeout},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Immutable parameters of one measurement run.
///
/// The request volume, `num_buckets * batches_per_bucket * requests_per_batch`,
/// is fixed for the life of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of time buckets the run is divided into
    pub num_buckets: usize,

    /// Consecutive batches that share one bucket
    pub batches_per_bucket: usize,

    /// Concurrent requests fired per batch
    pub requests_per_batch: usize,

    /// Wall-clock spacing between batch dispatches
    pub client_batch_delay: Duration,

    /// Per-request timeout; an expired request is recorded as a timeout error
    pub timeout: Duration,

    /// Endpoint every request is sent to
    pub endpoint: String,

    pub headers: BTreeMap<String, String>,

    pub body: Vec<u8>,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Create a run configuration from CLI arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut builder = Self::builder()
            .num_buckets(args.buckets)
            .batches_per_bucket(args.batches_per_bucket)
            .requests_per_batch(args.requests_per_batch)
            .client_batch_delay(args.batch_delay)
            .timeout(args.timeout)
            .endpoint(args.endpoint.clone())
            .body(args.body.clone().into_bytes());

        for (key, value) in &args.headers {
            builder = builder.header(key.clone(), value.clone());
        }

        builder.build()
    }

    /// Check every constraint a run depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("num_buckets", self.num_buckets)?;
        validate_positive("batches_per_bucket", self.batches_per_bucket)?;
        validate_positive("requests_per_batch", self.requests_per_batch)?;
        validate_timeout(self.timeout)?;
        if self.endpoint.is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        self.checked_volume()?;
        Ok(())
    }

    fn checked_volume(&self) -> Result<usize, ConfigError> {
        self.num_buckets
            .checked_mul(self.batches_per_bucket)
            .and_then(|batches| batches.checked_mul(self.requests_per_batch))
            .ok_or(ConfigError::VolumeOverflow)
    }

    /// Total number of batches in a run
    pub fn total_batches(&self) -> usize {
        self.num_buckets * self.batches_per_bucket
    }

    /// Total number of requests (and therefore responses) in a run
    pub fn request_volume(&self) -> usize {
        self.total_batches() * self.requests_per_batch
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            endpoint: self.endpoint.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
        }
    }
}

/// Fluent builder for [`RunConfig`]; counts and delays default to
/// [`crate::defaults`], the endpoint is required.
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    num_buckets: Option<usize>,
    batches_per_bucket: Option<usize>,
    requests_per_batch: Option<usize>,
    client_batch_delay: Option<Duration>,
    timeout: Option<Duration>,
    endpoint: Option<String>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl RunConfigBuilder {
    pub fn num_buckets(mut self, value: usize) -> Self {
        self.num_buckets = Some(value);
        self
    }

    pub fn batches_per_bucket(mut self, value: usize) -> Self {
        self.batches_per_bucket = Some(value);
        self
    }

    pub fn requests_per_batch(mut self, value: usize) -> Self {
        self.requests_per_batch = Some(value);
        self
    }

    pub fn client_batch_delay(mut self, value: Duration) -> Self {
        self.client_batch_delay = Some(value);
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    pub fn endpoint(mut self, value: impl Into<String>) -> Self {
        self.endpoint = Some(value.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.body = value.into();
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        use crate::defaults;

        let config = RunConfig {
            num_buckets: self.num_buckets.unwrap_or(defaults::NUM_BUCKETS),
            batches_per_bucket: self
                .batches_per_bucket
                .unwrap_or(defaults::BATCHES_PER_BUCKET),
            requests_per_batch: self
                .requests_per_batch
                .unwrap_or(defaults::REQUESTS_PER_BATCH),
            client_batch_delay: self
                .client_batch_delay
                .unwrap_or(defaults::CLIENT_BATCH_DELAY),
            timeout: self.timeout.unwrap_or(defaults::REQUEST_TIMEOUT),
            endpoint: self.endpoint.ok_or(ConfigError::Missing("endpoint"))?,
            headers: self.headers,
            body: self.body,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunResults {
    /// Buckets in time order, index 0 first
    pub buckets: Vec<BucketResult>,
    pub elapsed: Duration,
    pub batches_dispatched: usize,
}

impl RunResults {
    /// Responses folded into all buckets
    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.total_count).sum()
    }

    pub fn error_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.error_count).sum()
    }

    /// Error counts by kind across every bucket
    pub fn errors_by_kind(&self) -> BTreeMap<ErrorKind, u64> {
        let mut merged = BTreeMap::new();
        for bucket in &self.buckets {
            for (kind, count) in &bucket.by_error_type {
                *merged.entry(*kind).or_insert(0) += count;
            }
        }
        merged
    }

    pub fn summaries(&self) -> Vec<BucketSummary> {
        self.buckets.iter().map(BucketResult::summary).collect()
    }
}

/// Owner of the run configuration, request template and channel pool
pub struct LoadClient {
    config: RunConfig,
    pool: ChannelPool,
    request: Arc<RequestOptions>,
}

impl LoadClient {
    pub fn new(config: RunConfig, pool: ChannelPool) -> Result<Self, ConfigError> {
        config.validate()?;
        if pool.is_empty() {
            return Err(ConfigError::EmptyPool);
        }

        let request = Arc::new(config.request_options());
        Ok(Self {
            config,
            pool,
            request,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn request_volume(&self) -> usize {
        self.config.request_volume()
    }

    /// Dispatch one request through a randomly chosen channel.
    ///
    /// The dispatch check runs immediately and is the only way this can fail.
    /// The returned future completes with the request's outcome; transport
    /// errors and the configured timeout are folded into that outcome.
    pub fn send_one_request(
        &self,
    ) -> Result<impl Future<Output = RequestOutcome> + Send + 'static, DispatchError> {
        let channel = Arc::clone(self.pool.pick());
        channel.check_dispatch()?;

        let request = Arc::clone(&self.request);
        let started = Instant::now();

        Ok(async move {
            let result = timeout(request.timeout, channel.send(&request)).await;
            let duration = started.elapsed();

            match result {
                Ok(Ok(response)) => RequestOutcome {
                    error: None,
                    response_ok: response.ok,
                    duration,
                },
                Ok(Err(e)) => {
                    debug!("Request on '{}' failed: {}", channel.name(), e);
                    RequestOutcome::failure(e.kind(), duration)
                }
                Err(_) => RequestOutcome::failure(ErrorKind::Timeout, duration),
            }
        })
    }

    /// Run one measurement to completion.
    ///
    /// `start` anchors the batch cadence: batch `n` is due at
    /// `start + n * client_batch_delay`.
    pub async fn start_run(self: &Arc<Self>, start: Instant) -> Result<RunResults, RunError> {
        BatchRunner::new(Arc::clone(self), start)?.run().await
    }

    /// Run in the background and hand the result to `on_complete`, exactly once
    pub fn spawn_run<F>(self: &Arc<Self>, start: Instant, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<RunResults, RunError>) + Send + 'static,
    {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = client.start_run(start).await;
            on_complete(result);
        })
    }
}

impl std::fmt::Debug for LoadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadClient")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}
