//! Jetson Agent - node-side reporter for the telemetry kernel
//!
//! - Samples CPU cores, memory, uptime and the INA3221 power rail
//! - Serves the latest sample on `GET /api/sample` for kernel polling
//! - Optionally pushes samples to the kernel (HTTP or MQTT)

mod config;
mod discovery;
mod metrics;
mod power;
mod push;
mod server;

use anyhow::{Context, Result};
use config::AgentConfig;
use discovery::SystemInfo;
use metrics::Sampler;
use parking_lot::Mutex;
use push::Pusher;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jetson_agent=info".into()),
        )
        .init();

    info!("Jetson Agent starting...");

    let config = AgentConfig::load().await.context("Failed to load agent config")?;
    let system_info = SystemInfo::discover();
    info!(
        "Reporting as cluster {} node {} ({}), {} Hz",
        config.cluster_id, config.node_id, system_info.hostname, config.frequency_hz
    );

    let client_id = format!("jetson-agent-{}-{}", config.cluster_id, config.node_id);
    let sampler = Arc::new(Mutex::new(Sampler::new(config.clone(), system_info)));
    let (stop_tx, stop_rx) = watch::channel(false);

    let push_task = match &config.push {
        Some(push_config) => {
            let pusher = Pusher::connect(push_config, &client_id)?;
            Some(push::spawn_push_loop(pusher, sampler.clone(), config.frequency_hz, stop_rx.clone()))
        }
        None => None,
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for shutdown signal: {}", e);
            return;
        }
        let _ = stop_tx.send(true);
    });

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Serving samples on http://{}/api/sample", config.listen);

    let mut http_stop = stop_rx.clone();
    axum::serve(listener, server::build_router(sampler))
        .with_graceful_shutdown(async move {
            while !*http_stop.borrow() {
                if http_stop.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("Sample server failed")?;

    if let Some(task) = push_task {
        let _ = task.await;
    }
    info!("Jetson Agent stopped");
    Ok(())
}
