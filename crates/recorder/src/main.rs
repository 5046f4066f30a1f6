//! Sensor recorder - supervised recording of sensor readings
//!
//! This binary runs on each sensor node, sampling the configured metrics
//! and persisting threshold crossings, variance pairs and interval samples.

use anyhow::{Context, Result};
use recorder_lib::{
    alert::{AlertSink, AlertmanagerSink},
    latency::tune_plan,
    observability::{RecorderMetrics, StructuredLogger},
    sink::SqliteSink,
    source::{register_system_sources, SourceRegistry},
    RecordingEngine,
};
use sensor_recorder::{api, config::RecorderConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const RECORDER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sensor-recorder");

    let config = RecorderConfig::load()?;
    let mut plan = config
        .recording
        .validate()
        .context("invalid recording configuration")?;
    info!(
        node_name = %config.node_name,
        database = %config.database_path.display(),
        "Recorder configured"
    );

    let metrics = RecorderMetrics::new().context("failed to register metrics")?;
    let logger = StructuredLogger::new(&config.node_name);

    let mut sources = SourceRegistry::new();
    register_system_sources(&mut sources, &config.proc_root, &config.sys_root);

    if config.auto_interval.enabled {
        tune_plan(&mut plan, &sources, config.auto_interval.tuning()?).await;
    }

    let sink = SqliteSink::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let mut engine = RecordingEngine::new(
        plan,
        sources,
        Arc::new(sink),
        metrics.clone(),
        logger.clone(),
    );
    if let Some(url) = &config.alertmanager_url {
        let alert_sink: Arc<dyn AlertSink> =
            Arc::new(AlertmanagerSink::new(url.clone(), config.node_name.clone())?);
        engine = engine.with_alert_sink(alert_sink);
    }

    let engine = engine.start();
    logger.log_startup(RECORDER_VERSION, engine.workers().len());

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(engine.registry(), metrics));
    let (api_stop, api_stopped) = oneshot::channel::<()>();
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_stopped.await;
    }));

    // Wait for shutdown signal, or the API server dying first
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server exited",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server failed"
                }
            }
        }
    };

    logger.log_shutdown(reason);
    engine.shutdown().await;

    if !api_handle.is_finished() {
        let _ = api_stop.send(());
        if let Ok(Err(e)) = api_handle.await {
            error!(error = %e, "API server failed during shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
