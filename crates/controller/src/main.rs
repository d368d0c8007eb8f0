//! Predictive autoscaler controller
//!
//! Loads Autoscaler objects from a manifest, runs the reconcile loop against
//! Prometheus and the external prediction algorithm, and serves health,
//! metrics and status over HTTP.

use anyhow::{Context, Result};
use controller_lib::{
    health::HealthRegistry,
    observability::{ControllerMetrics, StructuredLogger},
    Controller, InMemoryStore, MetricsGatherer, OccumPredicter, ProcessRunner,
    PrometheusClient, Reconciler,
};
use phpa_controller::{api, config::Settings};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting phpa-controller");

    let settings = Settings::load()?;
    info!(
        prometheus = %settings.prometheus_url,
        manifest = %settings.manifest_path.display(),
        sync_period_secs = settings.sync_period_secs,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new("phpa-controller");

    let store = Arc::new(
        InMemoryStore::from_manifest(&settings.manifest_path)
            .context("failed to load autoscaler manifest")?,
    );

    let backend = PrometheusClient::new(&settings.prometheus_url)?;
    let gatherer = MetricsGatherer::with_config(backend, settings.gatherer_config());

    let runner = ProcessRunner::new(settings.interpreter.clone());
    let predicter = OccumPredicter::new(Arc::new(runner))
        .with_algorithm_path(settings.algorithm_path.clone())
        .with_default_timeout(settings.prediction_timeout());

    let reconciler = Reconciler::new(store.clone(), Arc::new(gatherer), Arc::new(predicter))
        .with_logger(logger.clone())
        .with_health(health_registry.clone())
        .with_sync_period(settings.sync_period());

    let (shutdown_tx, _) = broadcast::channel(1);
    let controller = Controller::new(
        Arc::new(reconciler),
        store.clone(),
        settings.controller_config(),
        health_registry.clone(),
    );
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        store.clone(),
    ));
    let mut api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    health_registry.set_ready(true).await;
    logger.log_startup(CONTROLLER_VERSION, store.len());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = &mut api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    // Receiver count is zero only if the loop already exited
    let _ = shutdown_tx.send(());
    controller_handle.await.context("control loop task failed")?;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
