//! fabricd - service daemon with a runtime metrics bus.
//!
//! Serves an aggregated metrics dashboard, optionally relays to Prometheus
//! and StatsD, and announces its endpoints to a service registry.

use fabricd::config::{self, Config};
use fabricd::daemon::{self, DEFAULT_SHUTDOWN_TIMEOUT, Daemon};
use fabricd::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "fabricd.toml".to_string());

    let config = Config::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config {config_path}: {e}"))?;

    // Initialize tracing
    telemetry::init(&config.logging)?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(path = %config_path, error = %e, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    info!(
        service = %config.service.name,
        transport = %config.transport.address,
        metrics = %config.metrics.address,
        "Starting fabricd"
    );

    let token = CancellationToken::new();
    let daemon = Daemon::start(&config, token.clone()).await.map_err(|e| {
        error!(error = %e, code = e.error_code(), "Startup failed");
        e
    })?;

    daemon::shutdown_signal(&token).await;

    let report = daemon.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
    if let Some(dispatch) = report.dispatch {
        info!(
            delivered = dispatch.delivered,
            drained = dispatch.drained,
            observer_panics = dispatch.observer_panics,
            "Metrics bus drained"
        );
    }
    for (name, stats) in &report.relays {
        info!(relay = *name, pushed = stats.pushed, failed = stats.failed, "Relay stopped");
    }
    info!(
        unfinished = report.unfinished.len(),
        release_failures = report.release_failures,
        "fabricd stopped"
    );

    Ok(())
}
