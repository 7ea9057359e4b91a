/**
 * PERSISTENCE - Snapshots durables du catalogue et des séries
 *
 * ROLE :
 * Durable backing for clusters, nodes and samples. The in-memory tables are
 * authoritative while the kernel runs; a `Persistence` implementation stores
 * a full snapshot on each flush tick and at shutdown, and hands it back at
 * startup so node handles survive restarts.
 *
 * IMPLEMENTATIONS :
 * - JsonFilePersistence : pretty JSON file, written to a temp file then renamed
 * - MemoryPersistence   : nothing is kept (tests, throwaway runs)
 */

use crate::error::StoreError;
use crate::models::{Cluster, Node, PowerSample, UtilizationSample};
use crate::state::SharedDatabase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Everything needed to rebuild the tables. Sample rows carry their sequence
/// number so the two rows of an ingestion pair stay joined after a reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub next_handle: u64,
    #[serde(default)]
    pub next_seq: u64,
    pub clusters: Vec<Cluster>,
    pub nodes: Vec<Node>,
    pub utilization: Vec<(u64, UtilizationSample)>,
    pub power: Vec<(u64, PowerSample)>,
}

impl Snapshot {
    pub const VERSION: u32 = 1;
}

pub trait Persistence: Send + Sync {
    /// `Ok(None)` when nothing was stored yet.
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(None)
    }

    fn save(&self, _snapshot: &Snapshot) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Flushes the database every `interval` until the stop signal, then once more.
pub fn spawn_snapshot_task(
    db: SharedDatabase,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!("starting snapshot task (every {}s)", interval.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let db = db.clone();
                    match tokio::task::spawn_blocking(move || db.flush()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("snapshot failed, retrying next tick: {e}"),
                        Err(e) => error!("snapshot task panicked: {e}"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = db.flush() {
            error!("final snapshot failed: {e}");
        }
    })
}

/// Snapshot task with its own stop channel. Stopped last, once every writer
/// (workers, sweeper, MQTT, HTTP drain) has joined, so the final flush sees
/// every accepted sample.
pub struct SnapshotTask {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SnapshotTask {
    pub fn spawn(db: SharedDatabase, interval: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = spawn_snapshot_task(db, interval, stop_rx);
        Self { stop, task }
    }

    /// Writes the final snapshot and waits for it.
    pub async fn finish(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!("snapshot task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterKind, NodeHandle};
    use time::macros::datetime;

    fn sample_snapshot() -> Snapshot {
        let at = datetime!(2020-03-27 00:00:00 UTC);
        Snapshot {
            version: Snapshot::VERSION,
            next_handle: 2,
            next_seq: 1,
            clusters: vec![Cluster {
                key: 2,
                name: "Jetson 2.0".into(),
                kind: ClusterKind::Jetson,
                refresh_rate_ms: 5000,
                created_at: at,
            }],
            nodes: vec![Node {
                handle: NodeHandle(1),
                cluster_key: 2,
                node_key: 1,
                address: "5.4.3.1".into(),
                os: "L4T".into(),
                uptime_secs: 10,
                first_seen: at,
                last_seen: at,
            }],
            utilization: vec![(
                0,
                UtilizationSample {
                    node: NodeHandle(1),
                    timestamp: at,
                    memory_available_mb: 5,
                    memory_used_mb: 100_000,
                    cores: vec![],
                },
            )],
            power: vec![],
        }
    }

    #[test]
    fn test_json_file_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("nested/telemetry.json"));

        assert!(persistence.load().unwrap().is_none());
        persistence.save(&sample_snapshot()).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].address, "5.4.3.1");
        assert_eq!(loaded.utilization[0].1.memory_used_mb, 100_000);
        assert!(!dir.path().join("nested/telemetry.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        fs::write(&path, "{not json").unwrap();

        let err = JsonFilePersistence::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
