/**
 * RETENTION - Purge périodique des échantillons expirés
 *
 * A single task evicts every row older than the retention window, once per
 * sweep interval, while ingestion keeps running. Each sweep takes the write
 * section once and releases it before sleeping.
 */
use crate::store::{EvictionReport, SampleStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub evicted: EvictionReport,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    store: SampleStore,
    policy: RetentionPolicy,
    last: Arc<Mutex<Option<SweepSummary>>>,
}

impl RetentionSweeper {
    pub fn new(store: SampleStore, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn last_sweep(&self) -> Option<SweepSummary> {
        *self.last.lock()
    }

    pub fn sweep_once(&self) -> SweepSummary {
        self.sweep_at(OffsetDateTime::now_utc())
    }

    pub fn sweep_at(&self, now: OffsetDateTime) -> SweepSummary {
        let started = Instant::now();
        let evicted = self.store.evict_older_than_at(self.policy.window, now);
        let summary = SweepSummary {
            at: now,
            evicted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if evicted.total() > 0 {
            info!(
                utilization = evicted.utilization,
                power = evicted.power,
                "retention sweep evicted {} row(s)",
                evicted.total()
            );
        } else {
            debug!("retention sweep: nothing to evict");
        }

        *self.last.lock() = Some(summary);
        summary
    }

    /// Sweeps immediately, then every `policy.interval` until the stop signal.
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            "starting retention sweeper (window {}h, every {}s)",
            self.policy.window.as_secs() / 3600,
            self.policy.interval.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once();
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("retention sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IdentityCatalog;
    use crate::ingest::{ClusterProfiles, Ingestor};
    use crate::models::NodeReport;
    use crate::state::Database;
    use time::macros::datetime;

    fn ingestor() -> Ingestor {
        let db = Database::in_memory().shared();
        Ingestor::new(IdentityCatalog::new(db.clone()), SampleStore::new(db), ClusterProfiles::default())
    }

    fn report() -> NodeReport {
        NodeReport {
            cluster_id: Some(1),
            node_id: Some(0),
            cores: vec![10.0],
            ..Default::default()
        }
    }

    #[test]
    fn test_sweep_evicts_pairs_past_window_and_records_summary() {
        let ingestor = ingestor();
        let now = datetime!(2020-04-10 12:00:00 UTC);
        for days_ago in [10, 8, 6, 1] {
            ingestor.ingest_at(&report(), now - time::Duration::days(days_ago)).unwrap();
        }

        let sweeper = RetentionSweeper::new(ingestor.store().clone(), RetentionPolicy::default());
        assert!(sweeper.last_sweep().is_none());

        let summary = sweeper.sweep_at(now);
        assert_eq!(summary.evicted, EvictionReport { utilization: 2, power: 2 });
        assert_eq!(sweeper.last_sweep(), Some(summary));
        assert_eq!(ingestor.store().utilization_rows(), 2);
        assert_eq!(ingestor.store().power_rows(), 2);

        assert_eq!(sweeper.sweep_at(now).evicted.total(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_stops_on_signal() {
        let ingestor = ingestor();
        let old = OffsetDateTime::now_utc() - time::Duration::days(30);
        ingestor.ingest_at(&report(), old).unwrap();

        let policy = RetentionPolicy {
            window: DEFAULT_WINDOW,
            interval: Duration::from_millis(20),
        };
        let sweeper = RetentionSweeper::new(ingestor.store().clone(), policy);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = sweeper.clone().spawn(stop_rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert_eq!(ingestor.store().utilization_rows(), 0);
        assert!(sweeper.last_sweep().is_some());
    }
}
