//! Run reports: the JSON document written after a run and the summary table
//! printed to stdout.

use crate::{
    bucket::{BucketSummary, ErrorKind},
    client::{RunConfig, RunResults},
    utils::{format_bytes, format_duration, format_millis, format_percent},
    utils::{generate_run_id, get_cpu_cores, print_table_row, print_table_separator},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, info};

/// Complete report for one run, as written to the output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub config: RunConfigSummary,
    pub buckets: Vec<BucketSummary>,
    pub totals: RunTotals,
}

/// Where and when the run happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Run configuration with durations flattened to milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfigSummary {
    pub num_buckets: usize,
    pub batches_per_bucket: usize,
    pub requests_per_batch: usize,
    pub client_batch_delay_ms: u64,
    pub timeout_ms: u64,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub body_bytes: usize,
    pub request_volume: usize,
}

impl From<&RunConfig> for RunConfigSummary {
    fn from(config: &RunConfig) -> Self {
        Self {
            num_buckets: config.num_buckets,
            batches_per_bucket: config.batches_per_bucket,
            requests_per_batch: config.requests_per_batch,
            client_batch_delay_ms: millis(config.client_batch_delay),
            timeout_ms: millis(config.timeout),
            endpoint: config.endpoint.clone(),
            headers: config.headers.clone(),
            body_bytes: config.body.len(),
            request_volume: config.request_volume(),
        }
    }
}

/// Counts across every bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub by_error_type: BTreeMap<ErrorKind, u64>,
    pub batches_dispatched: usize,
    pub elapsed_ms: u64,
}

/// Host information recorded for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub memory_gb: f64,
    pub rust_version: String,
    pub benchmark_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: get_cpu_cores(),
            memory_gb: total_memory_gb(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

fn total_memory_gb() -> f64 {
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl RunReport {
    pub fn from_results(config: &RunConfig, results: &RunResults) -> Self {
        let total_count = results.total_count();
        let error_count = results.error_count();
        let error_rate = if total_count == 0 {
            0.0
        } else {
            error_count as f64 / total_count as f64
        };

        Self {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id: generate_run_id(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::collect(),
            },
            config: RunConfigSummary::from(config),
            buckets: results.summaries(),
            totals: RunTotals {
                total_count,
                success_count: total_count - error_count,
                error_count,
                error_rate,
                by_error_type: results.errors_by_kind(),
                batches_dispatched: results.batches_dispatched,
                elapsed_ms: millis(results.elapsed),
            },
        }
    }

    /// Print a per-bucket table followed by run totals
    pub fn print_summary_table(&self) {
        let widths = [6, 8, 7, 8, 6, 6, 6, 6, 6, 6, 6, 10];
        println!();
        print_table_separator(&widths);
        print_table_row(
            &[
                "Bucket", "Requests", "Errors", "Timeouts", "Err%", "Min", "p50", "p75", "p95",
                "p99", "Max", "RSS",
            ],
            &widths,
        );
        print_table_separator(&widths);

        for bucket in &self.buckets {
            let error_rate = if bucket.total_count == 0 {
                0.0
            } else {
                bucket.error_count as f64 / bucket.total_count as f64
            };
            let rss = bucket
                .memory
                .as_ref()
                .map(|m| format_bytes(m.rss_bytes))
                .unwrap_or_else(|| "-".to_string());

            let row = [
                bucket.index.to_string(),
                bucket.total_count.to_string(),
                bucket.error_count.to_string(),
                bucket.timeout_count.to_string(),
                format_percent(error_rate),
                format_millis(bucket.latency.min),
                format_millis(bucket.latency.median),
                format_millis(bucket.latency.p75),
                format_millis(bucket.latency.p95),
                format_millis(bucket.latency.p99),
                format_millis(bucket.latency.max),
                rss,
            ];
            let columns: Vec<&str> = row.iter().map(String::as_str).collect();
            print_table_row(&columns, &widths);
        }
        print_table_separator(&widths);

        println!(
            "Total: {} requests, {} errors ({}) in {}",
            self.totals.total_count,
            self.totals.error_count,
            format_percent(self.totals.error_rate),
            format_duration(std::time::Duration::from_millis(self.totals.elapsed_ms))
        );
        for (kind, count) in &self.totals.by_error_type {
            println!("  {:<12} {}", kind, count);
        }
    }
}

/// Writes run reports to the configured output file
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Result<Self> {
        if let Some(parent) = output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        Ok(Self {
            output_file: output_file.to_path_buf(),
        })
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Write the report as pretty-printed JSON, replacing any previous file
    pub fn write(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        debug!("Report {} serialized", report.metadata.run_id);
        info!("Results written to: {:?}", self.output_file);
        Ok(())
    }

    /// Read a previously written report back
    pub fn load(&self) -> Result<RunReport> {
        let json = std::fs::read_to_string(&self.output_file)
            .with_context(|| format!("Failed to read results from {:?}", self.output_file))?;
        serde_json::from_str(&json).context("Failed to parse results file")
    }
}
