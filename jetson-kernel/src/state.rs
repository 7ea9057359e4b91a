/**
 * STATE - Section d'écriture unique du kernel
 *
 * ROLE :
 * Holds the identity catalog and every node's time series behind one lock.
 * Every mutation (catalog create/refresh, sample append, eviction) runs in
 * `Database::write`; reporting reads run in `Database::read` and therefore
 * see the state before or after any single mutation, never in between.
 *
 * LIFECYCLE :
 * Built once in `main` (optionally from a persisted snapshot), shared as
 * `Arc<Database>`, flushed a last time on shutdown.
 */

use crate::error::StoreError;
use crate::models::{Cluster, ClusterKey, Node, NodeHandle, NodeKey, PowerSample, UtilizationSample};
use crate::persistence::{MemoryPersistence, Persistence, Snapshot};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Row key inside one node's series. Rows of one ingestion pair share the key.
pub type SeriesKey = (OffsetDateTime, u64);

#[doc(hidden)]
#[derive(Debug, Default, Clone)]
pub struct NodeSeries {
    pub(crate) utilization: BTreeMap<SeriesKey, UtilizationSample>,
    pub(crate) power: BTreeMap<SeriesKey, PowerSample>,
}

/// Raw tables. Only reachable through `Database::write` / `Database::read`.
#[derive(Debug)]
pub struct Tables {
    pub(crate) clusters: HashMap<ClusterKey, Cluster>,
    pub(crate) nodes: HashMap<NodeHandle, Node>,
    pub(crate) node_index: HashMap<(ClusterKey, NodeKey), NodeHandle>,
    pub(crate) series: HashMap<NodeHandle, NodeSeries>,
    next_handle: u64,
    next_seq: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            clusters: HashMap::new(),
            nodes: HashMap::new(),
            node_index: HashMap::new(),
            series: HashMap::new(),
            next_handle: 1,
            next_seq: 0,
        }
    }
}

impl Tables {
    pub(crate) fn mint_handle(&mut self) -> NodeHandle {
        let handle = NodeHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn utilization_rows(&self) -> usize {
        self.series.values().map(|s| s.utilization.len()).sum()
    }

    pub fn power_rows(&self) -> usize {
        self.series.values().map(|s| s.power.len()).sum()
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        let mut utilization = Vec::with_capacity(self.utilization_rows());
        let mut power = Vec::with_capacity(self.power_rows());
        for series in self.series.values() {
            utilization.extend(series.utilization.iter().map(|((_, seq), row)| (*seq, row.clone())));
            power.extend(series.power.iter().map(|((_, seq), row)| (*seq, row.clone())));
        }

        let mut clusters: Vec<Cluster> = self.clusters.values().cloned().collect();
        clusters.sort_by_key(|c| c.key);
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.handle);

        Snapshot {
            version: Snapshot::VERSION,
            next_handle: self.next_handle,
            next_seq: self.next_seq,
            clusters,
            nodes,
            utilization,
            power,
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();

        for cluster in snapshot.clusters {
            tables.clusters.insert(cluster.key, cluster);
        }
        let mut max_handle = 0;
        for node in snapshot.nodes {
            max_handle = max_handle.max(node.handle.0);
            tables.node_index.insert((node.cluster_key, node.node_key), node.handle);
            tables.series.entry(node.handle).or_default();
            tables.nodes.insert(node.handle, node);
        }

        let mut max_seq = None;
        for (seq, row) in snapshot.utilization {
            max_seq = max_seq.max(Some(seq));
            if let Some(series) = tables.series.get_mut(&row.node) {
                series.utilization.insert((row.timestamp, seq), row);
            }
        }
        for (seq, row) in snapshot.power {
            max_seq = max_seq.max(Some(seq));
            if let Some(series) = tables.series.get_mut(&row.node) {
                series.power.insert((row.timestamp, seq), row);
            }
        }

        // Handles are never reused, even if the counter in the file is stale.
        tables.next_handle = snapshot.next_handle.max(max_handle + 1);
        tables.next_seq = snapshot.next_seq.max(max_seq.map_or(0, |s| s + 1));
        tables
    }
}

pub struct Database {
    tables: RwLock<Tables>,
    persistence: Box<dyn Persistence>,
    generation: AtomicU64,
    flushed_generation: AtomicU64,
}

pub type SharedDatabase = Arc<Database>;

impl Database {
    /// Opens the database, restoring the last snapshot the persistence layer holds.
    pub fn open<P: Persistence + 'static>(persistence: P) -> Result<Self, StoreError> {
        let tables = match persistence.load()? {
            Some(snapshot) => {
                let tables = Tables::from_snapshot(snapshot);
                info!(
                    clusters = tables.clusters.len(),
                    nodes = tables.nodes.len(),
                    rows = tables.utilization_rows() + tables.power_rows(),
                    "restored telemetry snapshot from {}",
                    persistence.describe()
                );
                tables
            }
            None => {
                info!("no snapshot at {}, starting empty", persistence.describe());
                Tables::default()
            }
        };

        Ok(Self {
            tables: RwLock::new(tables),
            persistence: Box::new(persistence),
            generation: AtomicU64::new(0),
            flushed_generation: AtomicU64::new(0),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            persistence: Box::new(MemoryPersistence),
            generation: AtomicU64::new(0),
            flushed_generation: AtomicU64::new(0),
        }
    }

    pub fn shared(self) -> SharedDatabase {
        Arc::new(self)
    }

    /// The write section: at most one mutation runs at a time across the process.
    pub fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.write();
        let result = f(&mut tables);
        self.generation.fetch_add(1, Ordering::Release);
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read();
        f(&tables)
    }

    /// Persists a snapshot if anything was written since the last flush.
    /// Returns whether a snapshot was written.
    pub fn flush(&self) -> Result<bool, StoreError> {
        let generation = self.generation.load(Ordering::Acquire);
        if generation == self.flushed_generation.load(Ordering::Acquire) {
            return Ok(false);
        }

        let snapshot = self.read(|t| t.to_snapshot());
        self.persistence.save(&snapshot)?;
        self.flushed_generation.store(generation, Ordering::Release);
        debug!(
            rows = snapshot.utilization.len() + snapshot.power.len(),
            "snapshot written to {}",
            self.persistence.describe()
        );
        Ok(true)
    }
}
