//! Command line arguments for the benchmark binary.

use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// RPC Batch Benchmark - fires timed batches of concurrent requests and
/// reports latency and error counts per time bucket
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of time buckets the run is divided into
    #[clap(
        short = 'b',
        long,
        default_value_t = crate::defaults::NUM_BUCKETS,
        help_heading = "Run Shape",
    )]
    pub buckets: usize,

    /// Consecutive batches attributed to one bucket
    #[clap(long, default_value_t = crate::defaults::BATCHES_PER_BUCKET, help_heading = "Run Shape")]
    pub batches_per_bucket: usize,

    /// Concurrent requests fired per batch
    #[clap(
        short = 'r',
        long,
        default_value_t = crate::defaults::REQUESTS_PER_BATCH,
        help_heading = "Run Shape",
    )]
    pub requests_per_batch: usize,

    /// Delay between batch dispatches (e.g. "100ms", "1s")
    #[clap(
        long,
        value_parser = parse_duration,
        default_value = "100ms",
        help_heading = "Run Shape",
    )]
    pub batch_delay: Duration,

    /// Per-request timeout
    #[clap(
        short = 't',
        long,
        value_parser = parse_duration,
        default_value = "500ms",
        help_heading = "Request",
    )]
    pub timeout: Duration,

    /// Endpoint every request is sent to
    #[clap(short = 'e', long, default_value = crate::defaults::ENDPOINT, help_heading = "Request")]
    pub endpoint: String,

    /// Request body
    #[clap(long, default_value = "", help_heading = "Request")]
    pub body: String,

    /// Request header as key=value (repeatable)
    #[clap(short = 'H', long = "header", value_parser = parse_header, help_heading = "Request")]
    pub headers: Vec<(String, String)>,

    /// Channel backend requests are sent through
    #[clap(long, value_enum, default_value_t = Backend::Simulated, help_heading = "Channels")]
    pub backend: Backend,

    /// Number of channels in the pool
    #[clap(
        short = 'c',
        long,
        default_value_t = crate::defaults::CHANNELS,
        help_heading = "Channels",
    )]
    pub channels: usize,

    /// Server addresses for the tcp backend (repeatable; channels are spread round-robin)
    #[clap(long, help_heading = "Channels")]
    pub connect: Vec<String>,

    /// Fixed response delay for the simulated backend
    #[clap(long, value_parser = parse_duration, help_heading = "Channels")]
    pub delay: Option<Duration>,

    /// Response delays in milliseconds for the simulated backend, stepped
    /// through once per --time-window-interval (e.g. "5,20,80")
    #[clap(long, value_delimiter = ',', help_heading = "Channels")]
    pub time_window: Vec<u64>,

    /// Interval between time window steps
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Channels")]
    pub time_window_interval: Duration,

    /// Run an echo server on this address instead of a benchmark
    #[clap(long)]
    pub serve: Option<String>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE)]
    pub output_file: PathBuf,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only print warnings and errors, and skip the summary table
    #[clap(short = 'q', long, default_value_t = false)]
    pub quiet: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            buckets: crate::defaults::NUM_BUCKETS,
            batches_per_bucket: crate::defaults::BATCHES_PER_BUCKET,
            requests_per_batch: crate::defaults::REQUESTS_PER_BATCH,
            batch_delay: crate::defaults::CLIENT_BATCH_DELAY,
            timeout: crate::defaults::REQUEST_TIMEOUT,
            endpoint: crate::defaults::ENDPOINT.to_string(),
            body: String::new(),
            headers: Vec::new(),
            backend: Backend::Simulated,
            channels: crate::defaults::CHANNELS,
            connect: Vec::new(),
            delay: None,
            time_window: Vec::new(),
            time_window_interval: crate::defaults::TIME_WINDOW_INTERVAL,
            serve: None,
            output_file: PathBuf::from(crate::defaults::OUTPUT_FILE),
            log_file: None,
            verbose: 0,
            quiet: false,
        }
    }
}

impl Args {
    /// Log filter directive implied by -v/-q when RUST_LOG is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Where requests are sent
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Backend {
    /// In-process channels with configurable response delays
    #[clap(name = "sim")]
    Simulated,

    /// Framed TCP connections to an echo server
    #[clap(name = "tcp")]
    Tcp,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Simulated => write!(f, "Simulated"),
            Backend::Tcp => write!(f, "TCP"),
        }
    }
}

/// Parse duration from string (e.g., "250ms", "1.5s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Duration out of range: {}", e))
}

/// Parse a header given as "key=value" or "key:value"
fn parse_header(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .or_else(|| s.split_once(':'))
        .ok_or_else(|| format!("Header must be key=value: {}", s))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Header name cannot be empty: {}", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("as=raw").unwrap(),
            ("as".to_string(), "raw".to_string())
        );
        assert_eq!(
            parse_header("x-trace: abc").unwrap(),
            ("x-trace".to_string(), "abc".to_string())
        );
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn test_args_defaults_match_parser() {
        let parsed = Args::parse_from(["rpc-batch-benchmark"]);
        let default = Args::default();
        assert_eq!(parsed.buckets, default.buckets);
        assert_eq!(parsed.batches_per_bucket, default.batches_per_bucket);
        assert_eq!(parsed.requests_per_batch, default.requests_per_batch);
        assert_eq!(parsed.batch_delay, default.batch_delay);
        assert_eq!(parsed.timeout, default.timeout);
        assert_eq!(parsed.endpoint, default.endpoint);
        assert_eq!(parsed.channels, default.channels);
        assert_eq!(parsed.time_window_interval, default.time_window_interval);
        assert_eq!(parsed.output_file, default.output_file);
        assert_eq!(parsed.backend, Backend::Simulated);
    }

    #[test]
    fn test_args_parse_run_shape() {
        let args = Args::parse_from([
            "rpc-batch-benchmark",
            "-b",
            "2",
            "--batches-per-bucket",
            "3",
            "-r",
            "4",
            "--batch-delay",
            "20ms",
            "-H",
            "as=raw",
            "--time-window",
            "5,10,20",
            "-vv",
        ]);
        assert_eq!(args.buckets, 2);
        assert_eq!(args.batches_per_bucket, 3);
        assert_eq!(args.requests_per_batch, 4);
        assert_eq!(args.batch_delay, Duration::from_millis(20));
        assert_eq!(args.headers, vec![("as".to_string(), "raw".to_string())]);
        assert_eq!(args.time_window, vec![5, 10, 20]);
        assert_eq!(args.log_level(), "trace");
    }

    #[test]
    fn test_log_level() {
        let mut args = Args::default();
        assert_eq!(args.log_level(), "info");
        args.verbose = 1;
        assert_eq!(args.log_level(), "debug");
        args.verbose = 0;
        args.quiet = true;
        assert_eq!(args.log_level(), "warn");
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Simulated.to_string(), "Simulated");
        assert_eq!(Backend::Tcp.to_string(), "TCP");
    }
}
