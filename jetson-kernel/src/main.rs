/**
 * JETSON KERNEL - Point d'entrée du service de télémétrie
 *
 * RÔLE : Orchestration des modules : config, base partagée, workers de
 * polling, purge de rétention, snapshots, MQTT, API HTTP.
 * Arrêt propre sur Ctrl-C : workers stoppés en fin de cycle, dernier snapshot écrit.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jetson_kernel::config::{load_config, KernelConfig};
use jetson_kernel::health::HealthTracker;
use jetson_kernel::http::{build_router, AppState};
use jetson_kernel::ingest::{HttpTransport, Ingestor, WorkerPool};
use jetson_kernel::persistence::{JsonFilePersistence, SnapshotTask};
use jetson_kernel::retention::RetentionSweeper;
use jetson_kernel::seed::{seed, SeedPlan};
use jetson_kernel::{Database, IdentityCatalog, SampleStore, SharedDatabase};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "jetson-kernel")]
#[command(about = "Telemetry ingestion and retention for Jetson clusters")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll configured nodes, accept pushed reports and serve the API (default)
    Serve,

    /// Fill the store with synthetic history for one cluster
    Seed {
        #[arg(long, default_value_t = 1)]
        cluster: u32,

        #[arg(long, default_value_t = 20)]
        nodes: u32,

        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Seconds between two entries of the same node
        #[arg(long, default_value_t = 60)]
        step_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jetson_kernel=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config().await;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::Seed { cluster, nodes, days, step_secs } => {
            let plan = SeedPlan::ending_now(cluster, nodes, days, Duration::from_secs(step_secs));
            run_seed(cfg, plan).await
        }
    }
}

fn open_database(cfg: &KernelConfig) -> Result<SharedDatabase> {
    let db = match &cfg.storage.snapshot_path {
        Some(path) => Database::open(JsonFilePersistence::new(path))
            .with_context(|| format!("failed to load snapshot {path}"))?,
        None => {
            info!("no snapshot path configured, telemetry is kept in memory only");
            Database::in_memory()
        }
    };
    Ok(db.shared())
}

async fn serve(cfg: KernelConfig) -> Result<()> {
    let db = open_database(&cfg)?;
    let ingestor = Ingestor::new(
        IdentityCatalog::new(db.clone()),
        SampleStore::new(db.clone()),
        cfg.cluster_profiles(),
    );
    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    let settings = cfg.worker_settings();
    let transport = HttpTransport::new(settings.timeout).context("failed to build HTTP client")?;

    let health_tracker = HealthTracker::new();
    let (stop_tx, stop_rx) = watch::channel(false);

    let snapshots = cfg
        .storage
        .snapshot_path
        .as_ref()
        .map(|_| SnapshotTask::spawn(db.clone(), cfg.flush_interval()));

    let sweeper = RetentionSweeper::new(ingestor.store().clone(), cfg.retention_policy());
    let sweeper_task = sweeper.clone().spawn(stop_rx.clone());

    let pool = WorkerPool::spawn(cfg.nodes.clone(), Arc::new(transport), ingestor.clone(), settings);
    health_tracker.register_workers(pool.stats());

    let mqtt_task = cfg.mqtt.clone().map(|conf| {
        health_tracker.mark_mqtt_connecting();
        jetson_kernel::mqtt::spawn_mqtt_listener(conf, ingestor.clone(), health_tracker.clone(), stop_rx.clone())
    });

    let app = build_router(AppState {
        ingestor,
        sweeper: Some(sweeper),
        health_tracker,
    });

    let signal_tx = stop_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for shutdown signal: {e}");
            return;
        }
        info!("shutdown requested");
        let _ = signal_tx.send(true);
    });

    info!("listening on http://{}", cfg.listen);
    let mut http_stop = stop_rx.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*http_stop.borrow() {
                if http_stop.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("HTTP server failed");

    let _ = stop_tx.send(true);
    pool.shutdown().await;
    let _ = sweeper_task.await;
    if let Some(task) = mqtt_task {
        let _ = task.await;
    }
    // Every writer has joined: the last snapshot holds all accepted samples.
    if let Some(snapshots) = snapshots {
        snapshots.finish().await;
    }
    info!("kernel stopped");
    served
}

async fn run_seed(cfg: KernelConfig, plan: SeedPlan) -> Result<()> {
    let db = open_database(&cfg)?;
    let ingestor = Ingestor::new(
        IdentityCatalog::new(db.clone()),
        SampleStore::new(db.clone()),
        cfg.cluster_profiles(),
    );

    info!(
        "seeding cluster {} with {} node(s) over {} day(s), {} entries per node",
        plan.cluster,
        plan.nodes,
        plan.days,
        plan.entries()
    );
    let stored = tokio::task::spawn_blocking(move || seed(&ingestor, &plan))
        .await
        .context("seeding task panicked")??;

    db.flush().context("failed to write snapshot")?;
    info!("seed complete: {stored} sample pair(s)");
    Ok(())
}
