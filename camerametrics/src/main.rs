//! Prometheus exporter for camera-management API statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

use camerametrics::config::{DEFAULT_CONFIG_FILE, DEFAULT_ENV};
use camerametrics::logging::{init_tracing, level_arg};
use camerametrics::{Exporter, HttpServer, MetricSet, RunContext, StatsRecorder};

/// How long spawned tasks get to finish after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Prometheus exporter for camera statistics.
#[derive(Parser, Debug)]
#[command(name = "camerametrics")]
#[command(about = "Export camera API statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (TOML format).
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Environment table to load from the configuration file.
    #[arg(long, default_value = DEFAULT_ENV)]
    env: String,

    /// Log level (DEBUG, INFO, WARNING, ERROR).
    #[arg(long, default_value = "INFO", value_parser = level_arg)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let ctx = RunContext::load_from_file(&args.config, &args.env).with_context(|| {
        format!(
            "Failed to load environment '{}' from {:?}",
            args.env, args.config
        )
    })?;

    // Initialize logging
    let _log_guard = init_tracing(args.log_level, ctx.log_format, &ctx.log_file)
        .context("Failed to initialize logging")?;

    info!(env = %ctx.env, "Starting camera metrics exporter");

    let metrics = Arc::new(MetricSet::new());
    let stats = Arc::new(StatsRecorder::new());
    let cancel = CancellationToken::new();

    let exporter = Exporter::from_context(&ctx, metrics.clone(), stats.clone())?;

    // Pull mode serves /metrics; push mode never opens a listener
    let http_task = if ctx.push {
        info!(
            gateway = %ctx.gateway,
            port = ctx.gateway_port,
            job = %ctx.job,
            "Configured to push metrics to gateway"
        );
        None
    } else {
        let server = HttpServer::new(
            metrics.clone(),
            stats.clone(),
            ctx.listen_addr(),
            ctx.metrics_path.clone(),
        );
        let listener = server.bind().await?;
        let http_shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(listener, http_shutdown).await {
                error!("HTTP server error: {}", e);
            }
        }))
    };

    // Cancel on Ctrl+C or SIGTERM
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        wait_for_signal().await;
        signal_cancel.cancel();
    });

    info!(
        host = %ctx.api_host,
        refresh_secs = ctx.refresh_rate,
        "Fetching metrics from camera API"
    );

    exporter.run(cancel.clone()).await;

    info!("Initiating graceful shutdown...");
    cancel.cancel();

    // Wait for tasks to complete
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Some(task) = http_task {
            let _ = task.await;
        }
    })
    .await;
    signal_task.abort();

    let stats = stats.snapshot();
    info!(
        cycles = stats.cycles,
        cycles_with_data = stats.cycles_with_data,
        fetch_failures = stats.fetch_failures,
        records_applied = stats.records_applied,
        pushes = stats.pushes,
        push_failures = stats.push_failures,
        series_count = metrics.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolve when the process receives Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
