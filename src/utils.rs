//! # Utility Functions and Helper Module
//!
//! Helpers shared across the benchmark: human-readable formatters for the
//! report table, parameter validators used when building a run configuration,
//! and small system information lookups.
//!
//! ## Usage Examples
//!
//! ```rust
//! use rpc_batch_benchmark::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! assert!(validate_positive("requests_per_batch", 4).is_ok());
//! ```

use crate::error::ConfigError;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a run
///
/// Creates a UUID v4 string used to tell reports from separate runs apart
/// when several are written to the same directory or collected together.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Automatically selects the most appropriate unit based on magnitude.
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use rpc_batch_benchmark::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a whole-millisecond latency value for table output
pub fn format_millis(ms: u64) -> String {
    format!("{}ms", ms)
}

/// Format bytes in a human-readable way using binary (1024-based) units
///
/// ```rust
/// # use rpc_batch_benchmark::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(2621440), "2.50 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a fraction as a percentage with one decimal place
pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Validate that a count parameter is at least one
///
/// Every dimension of a run (buckets, batches per bucket, requests per batch)
/// must be non-zero, otherwise the run would have no requests to wait for.
///
/// ## Returns
/// - `Ok(())`: The count is usable
/// - `Err(ConfigError::ZeroCount)`: The count is zero; the error names the parameter
pub fn validate_positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroCount { name, value });
    }
    Ok(())
}

/// Validate a per-request timeout
pub fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::ZeroTimeout);
    }
    Ok(())
}

/// Get the number of logical CPU cores available to this process
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Print a table row
///
/// Pads each column to its width and separates columns with pipes. Missing
/// widths default to 10 characters.
///
/// ```rust
/// # use rpc_batch_benchmark::utils::{print_table_row, print_table_separator};
/// let widths = [8, 10, 10];
/// print_table_separator(&widths);
/// print_table_row(&["Bucket", "Requests", "p99"], &widths);
/// print_table_separator(&widths);
/// ```
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator
///
/// ```text
/// +----------+------------+------------+
/// ```
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50μs");
        assert_eq!(format_duration(Duration::from_millis(250)), "250.00ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_percent_and_millis() {
        assert_eq!(format_percent(0.125), "12.5%");
        assert_eq!(format_millis(42), "42ms");
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("num_buckets", 1).is_ok());
        assert_eq!(
            validate_positive("num_buckets", 0),
            Err(ConfigError::ZeroCount {
                name: "num_buckets",
                value: 0
            })
        );
    }

    #[test]
    fn test_validate_timeout() {
        assert!(validate_timeout(Duration::from_millis(1)).is_ok());
        assert_eq!(validate_timeout(Duration::ZERO), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_generate_run_id_is_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_get_cpu_cores() {
        assert!(get_cpu_cores() > 0);
    }
}
