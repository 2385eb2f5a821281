//! # Batch Runner
//!
//! The runner drives one measurement run. On a fixed cadence it fires a batch
//! of concurrent requests, attributes each batch to the bucket that is active
//! at dispatch time, and folds responses into that bucket as they arrive.
//!
//! ## Scheduling
//!
//! Batch `n` is due at `start + n * client_batch_delay`. Anchoring every tick
//! to the run's start keeps a late tick from pushing all later ticks back.
//! The runner never waits for a batch to finish before firing the next one,
//! so batches overlap in flight.
//!
//! ## Completion
//!
//! The run is complete when the number of responses received equals the
//! request volume. Ticks and completions are multiplexed on a single task, so
//! buckets are only ever mutated from that task and need no locking.
//!
//! ## State Machine
//!
//! `Idle -> Running -> Completed`. [`BatchRunner::run`] consumes the runner,
//! so a runner reaches `Completed` at most once, either with the full set of
//! buckets or with the error that aborted it.

use crate::{
    bucket::{BucketResult, RequestOutcome},
    client::{LoadClient, RunResults},
    error::{ConfigError, DispatchError, RunError},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, trace, warn};

/// Error rate above which a completed bucket is reported as unhealthy
const BUCKET_ERROR_WARN_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

pub struct BatchRunner {
    client: Arc<LoadClient>,
    state: RunState,
    start: Instant,
    batch_delay: Duration,
    batches_per_bucket: usize,
    requests_per_batch: usize,
    total_batches: usize,
    request_volume: usize,
    batch_index: usize,
    responses_received: usize,
    buckets: Vec<BucketResult>,
    in_flight: JoinSet<(usize, RequestOutcome)>,
}

impl BatchRunner {
    /// Create an idle runner with one empty bucket per configured slot
    pub fn new(client: Arc<LoadClient>, start: Instant) -> Result<Self, ConfigError> {
        let config = client.config();
        let buckets = (0..config.num_buckets)
            .map(BucketResult::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            state: RunState::Idle,
            start,
            batch_delay: config.client_batch_delay,
            batches_per_bucket: config.batches_per_bucket,
            requests_per_batch: config.requests_per_batch,
            total_batches: config.total_batches(),
            request_volume: config.request_volume(),
            batch_index: 0,
            responses_received: 0,
            buckets,
            in_flight: JoinSet::new(),
            client,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn batch_index(&self) -> usize {
        self.batch_index
    }

    pub fn responses_received(&self) -> usize {
        self.responses_received
    }

    /// Bucket that the next batch will be attributed to
    pub fn active_bucket(&self) -> usize {
        (self.batch_index / self.batches_per_bucket).min(self.buckets.len() - 1)
    }

    /// Absolute time the next batch is due
    fn next_tick_at(&self) -> Instant {
        let batches = u32::try_from(self.batch_index).unwrap_or(u32::MAX);
        self.start
            .checked_add(self.batch_delay.saturating_mul(batches))
            .unwrap_or_else(Instant::now)
    }

    /// Fire one batch into the active bucket
    fn tick(&mut self) -> Result<(), DispatchError> {
        if self.batch_index >= self.total_batches {
            return Ok(());
        }

        let bucket = self.active_bucket();
        if self.batch_index % self.batches_per_bucket == 0 {
            self.buckets[bucket].touch();
            info!(
                "Bucket {}/{} active (batch {})",
                bucket + 1,
                self.buckets.len(),
                self.batch_index
            );
        }

        for _ in 0..self.requests_per_batch {
            let request = self.client.send_one_request()?;
            self.in_flight.spawn(async move { (bucket, request.await) });
        }

        trace!(
            "Dispatched batch {} ({} requests) into bucket {}",
            self.batch_index,
            self.requests_per_batch,
            bucket
        );
        self.batch_index += 1;
        Ok(())
    }

    fn record(&mut self, bucket: usize, outcome: RequestOutcome) {
        self.buckets[bucket].record(&outcome);
        self.responses_received += 1;
    }

    fn finish(&mut self) -> RunResults {
        self.state = RunState::Completed;
        let elapsed = Instant::now().saturating_duration_since(self.start);

        for bucket in &self.buckets {
            let rate = bucket.error_rate();
            if rate > BUCKET_ERROR_WARN_RATE {
                warn!(
                    "Bucket {} finished with {:.1}% errors ({} of {})",
                    bucket.index,
                    rate * 100.0,
                    bucket.error_count,
                    bucket.total_count
                );
            }
        }

        info!(
            "Run completed: {} responses in {:?}",
            self.responses_received, elapsed
        );
        RunResults {
            buckets: std::mem::take(&mut self.buckets),
            elapsed,
            batches_dispatched: self.batch_index,
        }
    }

    fn abort(&mut self, err: RunError) -> RunError {
        self.state = RunState::Completed;
        self.in_flight.abort_all();
        error!(
            "Run aborted after {} batches and {} responses: {}",
            self.batch_index, self.responses_received, err
        );
        err
    }

    /// Drive the run until every expected response has been folded in, or
    /// until a dispatch failure aborts it
    pub async fn run(mut self) -> Result<RunResults, RunError> {
        self.state = RunState::Running;
        info!(
            "Starting run: {} buckets x {} batches x {} requests = {} requests, batch delay {:?}",
            self.buckets.len(),
            self.batches_per_bucket,
            self.requests_per_batch,
            self.request_volume,
            self.batch_delay
        );

        while self.responses_received < self.request_volume {
            let ticks_remaining = self.batch_index < self.total_batches;
            let next_tick = self.next_tick_at();

            tokio::select! {
                biased;

                _ = sleep_until(next_tick), if ticks_remaining => {
                    if let Err(e) = self.tick() {
                        return Err(self.abort(e.into()));
                    }
                }

                joined = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Some(Ok((bucket, outcome))) => self.record(bucket, outcome),
                        Some(Err(e)) => {
                            return Err(self.abort(RunError::RequestTask(e.to_string())));
                        }
                        None => {}
                    }
                }

                else => {
                    let err = RunError::Incomplete {
                        received: self.responses_received,
                        expected: self.request_volume,
                    };
                    return Err(self.abort(err));
                }
            }
        }

        Ok(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelPool, SimulatedChannel, SimulatedEndpoint};
    use crate::client::RunConfig;

    fn client(
        buckets: usize,
        batches: usize,
        requests: usize,
        endpoint: SimulatedEndpoint,
    ) -> Arc<LoadClient> {
        let config = RunConfig::builder()
            .num_buckets(buckets)
            .batches_per_bucket(batches)
            .requests_per_batch(requests)
            .client_batch_delay(Duration::from_millis(10))
            .timeout(Duration::from_millis(100))
            .endpoint("echo")
            .build()
            .unwrap();
        let pool = ChannelPool::new(vec![
            Arc::new(SimulatedChannel::new("sim", endpoint)) as Arc<dyn Channel>
        ])
        .unwrap();
        Arc::new(LoadClient::new(config, pool).unwrap())
    }

    #[tokio::test]
    async fn test_runner_starts_idle() {
        let runner = BatchRunner::new(client(2, 2, 1, SimulatedEndpoint::Echo), Instant::now())
            .unwrap();
        assert_eq!(runner.state(), RunState::Idle);
        assert_eq!(runner.batch_index(), 0);
        assert_eq!(runner.active_bucket(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_advances_batches_and_buckets() {
        let mut runner =
            BatchRunner::new(client(2, 2, 3, SimulatedEndpoint::Echo), Instant::now()).unwrap();

        runner.tick().unwrap();
        assert_eq!(runner.batch_index(), 1);
        assert_eq!(runner.active_bucket(), 0);
        assert_eq!(runner.in_flight.len(), 3);
        assert!(runner.buckets[0].memory.is_some());

        runner.tick().unwrap();
        assert_eq!(runner.active_bucket(), 1);
        runner.tick().unwrap();
        runner.tick().unwrap();
        assert_eq!(runner.batch_index(), 4);

        // Past the last batch a tick is a no-op.
        runner.tick().unwrap();
        assert_eq!(runner.batch_index(), 4);
        assert_eq!(runner.in_flight.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_tick_is_anchored_to_start() {
        let start = Instant::now();
        let mut runner = BatchRunner::new(client(1, 5, 1, SimulatedEndpoint::Echo), start).unwrap();
        assert_eq!(runner.next_tick_at(), start);

        runner.tick().unwrap();
        runner.tick().unwrap();
        assert_eq!(runner.next_tick_at(), start + Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_collects_full_volume() {
        let results = BatchRunner::new(client(3, 2, 5, SimulatedEndpoint::Echo), Instant::now())
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(results.buckets.len(), 3);
        assert_eq!(results.total_count(), 30);
        assert_eq!(results.batches_dispatched, 6);
        for bucket in &results.buckets {
            assert_eq!(bucket.total_count, 10);
            assert_eq!(bucket.success_count, 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aborts_on_dispatch_failure() {
        let config = RunConfig::builder()
            .num_buckets(1)
            .batches_per_bucket(1)
            .requests_per_batch(2)
            .endpoint("echo")
            .build()
            .unwrap();
        let pool = ChannelPool::new(vec![Arc::new(SimulatedChannel::failing_dispatch(
            "broken", "offline",
        )) as Arc<dyn Channel>])
        .unwrap();
        let client = Arc::new(LoadClient::new(config, pool).unwrap());

        let err = BatchRunner::new(client, Instant::now())
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Dispatch(_)));
    }
}
