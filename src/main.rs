//! integration-sync - periodic, non-overlapping syncs against third-party providers
//!
//! This is the composition root: it loads configuration, wires the shared
//! HTTP client, adapters, registry and scheduler, and runs until a shutdown
//! signal arrives.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use integration_sync::config::Config;
use integration_sync::integrations::build_integration;
use integration_sync::otel::{init_tracing, OtelProvider, SyncMetrics};
use integration_sync::sync::{
    HttpClient, HttpClientConfig, RegisterOptions, SchedulerConfig, StatusReporter,
    SyncRegistry, SyncScheduler,
};

/// integration-sync - periodic, non-overlapping syncs against third-party providers
#[derive(Parser, Debug)]
#[command(name = "integration-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "INTEGRATION_SYNC_CONFIG")]
    config: Option<String>,

    /// Run one manual sync for the named integration, print the outcome and exit
    #[arg(long, value_name = "NAME", conflicts_with = "status")]
    trigger: Option<String>,

    /// Print adapter statuses with health checks and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(
        &otel_provider,
        &config.logging.level,
        &config.logging.format,
    )?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting integration-sync"
    );

    // One HTTP client shared by every adapter
    let http = Arc::new(HttpClient::new(HttpClientConfig::from(&config.http))?);

    let registry = Arc::new(SyncRegistry::new());
    let metrics = Arc::new(SyncMetrics::new(&otel_provider.meter()));
    let scheduler = SyncScheduler::with_metrics(
        registry.clone(),
        SchedulerConfig::from(&config.scheduler),
        metrics,
    );
    let reporter = StatusReporter::new(registry.clone());

    // Register manually first, schedule only for the long-running mode
    let one_shot = args.trigger.is_some() || args.status;

    let mut names: Vec<_> = config.integrations.keys().cloned().collect();
    names.sort();

    for name in names {
        let Some(integration_cfg) = config.integrations.get(&name) else {
            continue;
        };
        if !integration_cfg.enabled {
            info!(integration = %name, "Integration disabled, skipping");
            continue;
        }

        let integration = build_integration(&name, integration_cfg, http.clone())?;
        if !integration.connect().await {
            warn!(
                integration = %name,
                "Integration not configured; runs will fail until credentials are provided"
            );
        }

        let mut options = RegisterOptions::default().with_retries(integration_cfg.retries);
        if !one_shot {
            if let Some(interval) = integration_cfg.interval() {
                options = options.with_interval(interval);
            }
        }

        scheduler.register_integration(integration, options)?;
        info!(
            integration = %name,
            kind = %integration_cfg.kind,
            interval_secs = integration_cfg.interval_secs,
            retries = integration_cfg.retries,
            "Integration registered"
        );
    }

    if let Some(name) = &args.trigger {
        let outcome = scheduler.trigger_now(name).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        scheduler.shutdown(None).await;
        shutdown_otel(&otel_provider);
        return Ok(());
    }

    if args.status {
        let statuses = reporter.healthchecks().await;
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        scheduler.shutdown(None).await;
        shutdown_otel(&otel_provider);
        return Ok(());
    }

    reporter.log_statuses();

    shutdown_signal().await;

    scheduler
        .shutdown(config.scheduler.shutdown_deadline())
        .await;
    reporter.log_statuses();

    shutdown_otel(&otel_provider);
    info!("integration-sync shutdown complete");

    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

fn shutdown_otel(otel_provider: &OtelProvider) {
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
