//! # RPC Batch Benchmark - Main Entry Point
//!
//! The binary has two modes:
//!
//! - **Benchmark** (default): builds a channel pool, runs one measurement and
//!   writes the JSON report. With `--backend sim` requests are answered
//!   in-process, optionally with a fixed `--delay` or a stepped
//!   `--time-window` of delays. With `--backend tcp` every channel is a framed
//!   TCP connection to one of the `--connect` addresses.
//! - **Server** (`--serve ADDR`): runs the echo server the tcp backend talks
//!   to, until interrupted.
//!
//! ## Error Handling
//!
//! A dispatch failure aborts the run and is reported with no partial results;
//! the process exits non-zero. Per-request failures only show up in the
//! report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rpc_batch_benchmark::{
    channel::{serve_echo, Channel, ChannelPool, SimulatedChannel, SimulatedEndpoint, TcpChannel},
    cli::{Args, Backend},
    logging,
    results::{ResultsManager, RunReport},
    time_window::TimeWindow,
    utils::validate_positive,
    LoadClient, RunConfig,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file appender flushes.
    let _log_guard = logging::init(args.log_level(), args.log_file.as_deref())?;

    if let Some(addr) = args.serve.clone() {
        return run_server(&addr).await;
    }

    info!("Starting RPC Batch Benchmark v{}", rpc_batch_benchmark::VERSION);

    let config = RunConfig::from_args(&args)?;
    let results_manager = ResultsManager::new(&args.output_file)?;

    let window = if args.time_window.is_empty() {
        None
    } else {
        let window = Arc::new(TimeWindow::new(
            args.time_window.clone(),
            args.time_window_interval,
        )?);
        Some(window)
    };

    let pool = build_pool(&args, window.clone()).await?;
    info!(
        "Using {} {} channel(s): {:?}",
        pool.len(),
        args.backend,
        pool
    );

    let client = Arc::new(LoadClient::new(config, pool)?);

    let window_task = window.map(|w| w.spawn());
    let result = client.start_run(Instant::now()).await;
    if let Some(task) = window_task {
        task.abort();
    }

    let results = match result {
        Ok(results) => results,
        Err(e) => {
            error!("Benchmark failed: {}", e);
            return Err(e.into());
        }
    };

    let report = RunReport::from_results(client.config(), &results);
    if !args.quiet {
        report.print_summary_table();
    }
    results_manager.write(&report)?;

    info!("RPC Batch Benchmark completed");
    Ok(())
}

/// Build the channel pool for the selected backend
async fn build_pool(args: &Args, window: Option<Arc<TimeWindow>>) -> Result<ChannelPool> {
    validate_positive("channels", args.channels)?;

    let mut channels: Vec<Arc<dyn Channel>> = Vec::with_capacity(args.channels);
    match args.backend {
        Backend::Simulated => {
            let behaviour = match (window, args.delay) {
                (Some(window), delay) => {
                    if delay.is_some() {
                        warn!("--delay is ignored when --time-window is set");
                    }
                    SimulatedEndpoint::WindowDelay(window)
                }
                (None, Some(delay)) => SimulatedEndpoint::Delay(delay),
                (None, None) => SimulatedEndpoint::Echo,
            };
            for i in 0..args.channels {
                let channel = SimulatedChannel::new(format!("sim-{}", i), behaviour.clone())
                    .route("health", SimulatedEndpoint::Health);
                channels.push(Arc::new(channel));
            }
        }
        Backend::Tcp => {
            if args.connect.is_empty() {
                bail!("--backend tcp requires at least one --connect address");
            }
            if window.is_some() || args.delay.is_some() {
                warn!("--delay and --time-window only apply to the simulated backend");
            }
            for i in 0..args.channels {
                let addr = &args.connect[i % args.connect.len()];
                let channel = TcpChannel::connect(format!("tcp-{}", i), addr.as_str())
                    .await
                    .with_context(|| format!("Failed to connect to {}", addr))?;
                channels.push(Arc::new(channel));
            }
        }
    }

    Ok(ChannelPool::new(channels)?)
}

async fn run_server(addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Echo server listening on {}", listener.local_addr()?);

    tokio::select! {
        result = serve_echo(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down echo server");
            Ok(())
        }
    }
}
