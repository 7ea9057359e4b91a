/**
 * INGESTION WORKERS - Une tâche de polling par nœud surveillé
 *
 * Each worker owns its address, its cadence and its counters. The transport
 * wait holds no lock; only the final `Ingestor::ingest` call enters the write
 * section. Workers stop at cycle boundaries when the pool's watch channel
 * flips to `true`.
 */
use super::{Ingestor, Transport};
use crate::error::{IngestError, StoreError, TransportError};
use crate::models::NodeHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Cadence used until a node reports a frequency, and whenever it reports 0.
    pub interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Upper bound on one transport call.
    pub timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Converts a reported frequency (Hz) to a polling period within the
/// configured bounds. Frequency 0 keeps the static interval.
pub fn cadence_for(frequency: u32, settings: &WorkerSettings) -> Duration {
    if frequency == 0 {
        return settings.interval;
    }
    let period = Duration::from_secs_f64(1.0 / f64::from(frequency));
    period.max(settings.min_interval).min(settings.max_interval)
}

/// Lock-free counters, read by the health report while the worker runs.
#[derive(Debug)]
pub struct WorkerStats {
    address: String,
    cycles: AtomicU64,
    ingested: AtomicU64,
    transport_failures: AtomicU64,
    rejected: AtomicU64,
    store_failures: AtomicU64,
    cadence_ms: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub address: String,
    pub cycles: u64,
    pub ingested: u64,
    pub transport_failures: u64,
    pub rejected: u64,
    pub store_failures: u64,
    pub cadence_ms: u64,
}

impl WorkerStats {
    pub fn new(address: impl Into<String>, cadence: Duration) -> Self {
        Self {
            address: address.into(),
            cycles: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            cadence_ms: AtomicU64::new(cadence.as_millis() as u64),
        }
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            address: self.address.clone(),
            cycles: self.cycles.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            cadence_ms: self.cadence_ms.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<NodeHandle, IngestError>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(_) => &self.ingested,
            Err(IngestError::Transport(_)) => &self.transport_failures,
            Err(IngestError::Validation(_)) => &self.rejected,
            Err(IngestError::Store(_)) => &self.store_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct IngestionWorker<T> {
    address: String,
    transport: Arc<T>,
    ingestor: Ingestor,
    settings: WorkerSettings,
    cadence: Duration,
    stats: Arc<WorkerStats>,
}

impl<T: Transport> IngestionWorker<T> {
    pub fn new(address: impl Into<String>, transport: Arc<T>, ingestor: Ingestor, settings: WorkerSettings) -> Self {
        let address = address.into();
        let stats = Arc::new(WorkerStats::new(address.clone(), settings.interval));
        Self {
            address,
            transport,
            ingestor,
            settings,
            cadence: settings.interval,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// One poll: fetch, ingest, adjust the cadence. Never panics, never blocks
    /// longer than the transport timeout plus one write section.
    pub async fn cycle(&mut self) -> Result<NodeHandle, IngestError> {
        let fetched = match tokio::time::timeout(self.settings.timeout, self.transport.fetch(&self.address)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.settings.timeout)),
        };

        let outcome = match fetched {
            Ok(report) => {
                let outcome = self.ingestor.ingest(&report);
                self.cadence = cadence_for(report.frequency, &self.settings);
                self.stats.cadence_ms.store(self.cadence.as_millis() as u64, Ordering::Relaxed);
                outcome
            }
            Err(e) => Err(e.into()),
        };

        self.stats.record(&outcome);
        outcome
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(address = %self.address, cadence_ms = self.cadence.as_millis() as u64, "ingestion worker started");

        loop {
            if *stop.borrow() {
                break;
            }

            match self.cycle().await {
                Ok(node) => debug!(address = %self.address, %node, "sample stored"),
                Err(IngestError::Transport(e)) => warn!(address = %self.address, "poll failed, retrying: {e}"),
                Err(IngestError::Validation(e)) => warn!(address = %self.address, "sample dropped: {e}"),
                Err(IngestError::Store(e @ StoreError::UnknownNode(_))) => {
                    error!(address = %self.address, "cycle abandoned: {e}")
                }
                Err(IngestError::Store(e)) => error!(address = %self.address, "store rejected sample: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cadence) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!(address = %self.address, "ingestion worker stopped");
    }
}

/// One worker task per monitored address, sharing a stop channel.
pub struct WorkerPool {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
}

impl WorkerPool {
    pub fn spawn<T: Transport>(
        targets: impl IntoIterator<Item = String>,
        transport: Arc<T>,
        ingestor: Ingestor,
        settings: WorkerSettings,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        let mut stats = Vec::new();

        for address in targets {
            let worker = IngestionWorker::new(address, transport.clone(), ingestor.clone(), settings);
            stats.push(worker.stats());
            tasks.push(tokio::spawn(worker.run(stop_rx.clone())));
        }

        info!("worker pool started with {} node(s)", tasks.len());
        Self { stop, tasks, stats }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn stats(&self) -> Vec<Arc<WorkerStats>> {
        self.stats.clone()
    }

    /// Signals every worker and waits for them to finish their current cycle.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("ingestion worker ended abnormally: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frequency_keeps_static_interval() {
        let settings = WorkerSettings::default();
        assert_eq!(cadence_for(0, &settings), Duration::from_secs(5));
    }

    #[test]
    fn test_frequency_maps_to_period() {
        let settings = WorkerSettings::default();
        assert_eq!(cadence_for(1, &settings), Duration::from_secs(1));
        assert_eq!(cadence_for(4, &settings), Duration::from_millis(250));
    }

    #[test]
    fn test_cadence_is_clamped() {
        let settings = WorkerSettings {
            min_interval: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(cadence_for(1000, &settings), Duration::from_millis(500));

        let slow = WorkerSettings {
            max_interval: Duration::from_millis(200),
            ..Default::default()
        };
        assert_eq!(cadence_for(1, &slow), Duration::from_millis(200));
    }

    #[test]
    fn test_stats_classify_outcomes() {
        let stats = WorkerStats::new("10.0.0.1:8080", Duration::from_secs(5));
        stats.record(&Ok(NodeHandle(1)));
        stats.record(&Err(TransportError::Status(503).into()));
        stats.record(&Err(crate::error::ValidationError::MissingNodeKey.into()));

        let snap = stats.snapshot();
        assert_eq!(snap.cycles, 3);
        assert_eq!(snap.ingested, 1);
        assert_eq!(snap.transport_failures, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.cadence_ms, 5000);
    }
}
