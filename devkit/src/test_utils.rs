/*!
Harness de test pour le kernel

Wires an in-memory database to a catalog, a store and an ingestor, and gives
tests polling helpers for asynchronous writers.
*/

use jetson_kernel::catalog::IdentityCatalog;
use jetson_kernel::ingest::{ClusterProfiles, Ingestor};
use jetson_kernel::models::{ClusterKey, NodeHandle, NodeKey};
use jetson_kernel::state::{Database, SharedDatabase};
use jetson_kernel::store::SampleStore;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

pub struct TestHarness {
    pub db: SharedDatabase,
    pub catalog: IdentityCatalog,
    pub store: SampleStore,
    pub ingestor: Ingestor,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_database(Database::in_memory().shared(), ClusterProfiles::default())
    }

    pub fn with_database(db: SharedDatabase, profiles: ClusterProfiles) -> Self {
        init_tracing();
        let catalog = IdentityCatalog::new(db.clone());
        let store = SampleStore::new(db.clone());
        let ingestor = Ingestor::new(catalog.clone(), store.clone(), profiles);
        Self { db, catalog, store, ingestor }
    }

    pub fn handle(&self, cluster: ClusterKey, node: NodeKey) -> Option<NodeHandle> {
        self.catalog.lookup(cluster, node)
    }

    /// Utilization rows of one node over all time.
    pub fn rows_for(&self, node: NodeHandle) -> usize {
        self.store
            .query_utilization(node, OffsetDateTime::UNIX_EPOCH, far_future())
            .iter()
            .count()
    }

    /// Polls until the store holds at least `rows` utilization rows.
    pub async fn wait_for_rows(&self, rows: usize, timeout_ms: u64) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.store.utilization_rows() >= rows {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::warn!("timeout waiting for {rows} row(s), have {}", self.store.utilization_rows());
        false
    }
}

pub fn far_future() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time::Duration::days(365 * 1000)
}

/// Logs go through the test writer so they show only for failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
