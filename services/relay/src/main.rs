//! Frame Relay Service
//!
//! Captures one still frame from a live camera feed per capture period and
//! uploads queued frames to the ingestion endpoint per upload period.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with RELAY__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{Context, Result};
use frame_relay::config::{LoggingConfig, PipelineConfig};
use frame_relay::{DrainReport, LifecycleController, PipelineEvent, StatsSnapshot};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "frame-relay",
        version = env!("CARGO_PKG_VERSION"),
        store = %config.capture.store_path.display(),
        endpoint = %config.upload.endpoint,
        "Starting frame relay service"
    );

    // Validate configuration
    config.validate()?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let controller = LifecycleController::new();
    let events = tokio::spawn(log_events(controller.events().subscribe()));

    controller
        .start(config)
        .await
        .context("Failed to start capture session")?;

    info!("Frame relay service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Initiating graceful shutdown...");
    let report = controller
        .stop()
        .await
        .context("Failed to drain capture session")?;
    log_drain_report(&report);

    log_final_stats(&controller.stats());

    drop(controller);
    if let Err(e) = events.await {
        warn!(error = %e, "Event logger ended abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration, falling back to the environment alone.
fn load_config() -> Result<PipelineConfig> {
    let config = PipelineConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        PipelineConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("frame_relay={}", level).parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Forward pipeline events to the log until the bus closes.
async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::UploadStats { uploaded }) => {
                info!(uploaded, "Upload progress");
            }
            Ok(PipelineEvent::CaptureError { message }) => {
                warn!(error = %message, "Capture error reported");
            }
            Ok(PipelineEvent::PipelineStopped) => {
                info!("Pipeline stopped");
            }
            Ok(event) => {
                debug!(?event, "Pipeline event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

fn log_drain_report(report: &DrainReport) {
    if report.completed {
        info!(
            passes = report.passes,
            recovered = report.recovered,
            "All captured frames delivered"
        );
    } else {
        warn!(
            passes = report.passes,
            remaining = report.remaining,
            "Frames left in capture store for next session"
        );
    }
}

/// Log final statistics on shutdown.
fn log_final_stats(stats: &StatsSnapshot) {
    info!(
        frames_captured = stats.frames_captured,
        capture_errors = stats.capture_errors,
        frames_uploaded = stats.frames_uploaded,
        frames_requeued = stats.frames_requeued,
        frames_dead_lettered = stats.frames_dead_lettered,
        frames_dropped = stats.frames_dropped,
        frames_recovered = stats.frames_recovered,
        "Final pipeline statistics"
    );
}
