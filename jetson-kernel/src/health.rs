use crate::catalog::IdentityCatalog;
use crate::ingest::{WorkerStats, WorkerStatsSnapshot};
use crate::retention::{RetentionSweeper, SweepSummary};
use crate::store::SampleStore;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub clusters_tracked: usize,
    pub nodes_tracked: usize,
    pub utilization_rows: usize,
    pub power_rows: usize,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub last_sweep: Option<SweepSummary>,
    pub workers: Vec<WorkerStatsSnapshot>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    workers: Arc<RwLock<Vec<Arc<WorkerStats>>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
            workers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn register_workers(&self, stats: Vec<Arc<WorkerStats>>) {
        self.workers.write().extend(stats);
    }

    pub fn get_health(
        &self,
        catalog: &IdentityCatalog,
        store: &SampleStore,
        sweeper: Option<&RetentionSweeper>,
    ) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            clusters_tracked: catalog.cluster_count(),
            nodes_tracked: catalog.node_count(),
            utilization_rows: store.utilization_rows(),
            power_rows: store.power_rows(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            last_sweep: sweeper.and_then(|s| s.last_sweep()),
            workers: self.workers.read().iter().map(|w| w.snapshot()).collect(),
        }
    }
}

/// Resident set size of this process. 0.0 where /proc is unavailable.
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Database;
    use std::time::Duration;

    #[test]
    fn test_health_reports_counts_and_workers() {
        let db = Database::in_memory().shared();
        let catalog = IdentityCatalog::new(db.clone());
        let store = SampleStore::new(db);
        let tracker = HealthTracker::new();
        tracker.register_workers(vec![Arc::new(WorkerStats::new("10.0.0.1:8080", Duration::from_secs(5)))]);

        let health = tracker.get_health(&catalog, &store, None);
        assert_eq!(health.nodes_tracked, 0);
        assert_eq!(health.mqtt_status, "disabled");
        assert_eq!(health.workers.len(), 1);
        assert_eq!(health.workers[0].address, "10.0.0.1:8080");
        assert!(health.last_sweep.is_none());

        tracker.increment_reconnects();
        let health = tracker.get_health(&catalog, &store, None);
        assert_eq!(health.mqtt_reconnects, 1);
        assert_eq!(health.mqtt_status, "reconnecting");
    }
}
