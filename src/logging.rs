//! # Logging Setup
//!
//! Console output uses [`ColorizedFormatter`], which colors each line by level
//! and keeps lines free of timestamps so progress messages stay readable next
//! to the summary table. An optional file layer writes plain, timestamped
//! lines through a non-blocking appender.

use anyhow::{anyhow, Context, Result};
use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Tracing event formatter that colors the whole line by level.
///
/// With `with_level(true)` the line is prefixed by a padded level name, which
/// is useful when debug output is interleaved with info lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorizedFormatter {
    show_level: bool,
}

impl ColorizedFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, show_level: bool) -> Self {
        self.show_level = show_level;
        self
    }
}

fn colorize(text: &str, level: Level) -> ColoredString {
    match level {
        Level::INFO => text.white(),
        Level::WARN => text.yellow(),
        Level::ERROR => text.red(),
        Level::DEBUG => text.blue(),
        Level::TRACE => text.purple(),
    }
}

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Fields are buffered so the color applies to the entire line.
        let mut buffer = String::new();
        if self.show_level {
            buffer.push_str(&format!("{:>5} ", event.metadata().level()));
        }
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        writeln!(writer, "{}", colorize(&buffer, *event.metadata().level()))
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. When `log_file` is set,
/// the returned guard must be kept alive until exit so buffered lines are
/// flushed.
pub fn init(default_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("Invalid log level: {}", default_level))?;

    let show_level = default_level != "info" && default_level != "warn";
    let console = tracing_subscriber::fmt::layer()
        .event_format(ColorizedFormatter::new().with_level(show_level))
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Log file path has no file name: {:?}", path))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatter_builder() {
        assert!(!ColorizedFormatter::new().show_level);
        assert!(ColorizedFormatter::new().with_level(true).show_level);
    }

    #[test]
    fn test_colorize_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(colorize("hello", Level::WARN).to_string(), "hello");
        colored::control::unset_override();
    }
}
