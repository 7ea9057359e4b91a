//! Identity catalog: cluster → node hierarchy and surrogate node handles.

use crate::error::ValidationError;
use crate::models::{Cluster, ClusterKey, IdentityDefaults, Node, NodeHandle, NodeKey};
use crate::state::SharedDatabase;
use time::OffsetDateTime;
use tracing::info;

#[derive(Clone)]
pub struct IdentityCatalog {
    db: SharedDatabase,
}

impl IdentityCatalog {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Resolves a (cluster, node) pair to its stable handle, creating the
    /// cluster and/or node on first sight. Lookup and creation happen inside
    /// one write section, so concurrent callers with the same pair always get
    /// the same handle.
    pub fn resolve_or_create(
        &self,
        cluster_key: Option<ClusterKey>,
        node_key: Option<NodeKey>,
        defaults: &IdentityDefaults,
    ) -> Result<NodeHandle, ValidationError> {
        self.resolve_or_create_at(cluster_key, node_key, defaults, OffsetDateTime::now_utc())
    }

    pub fn resolve_or_create_at(
        &self,
        cluster_key: Option<ClusterKey>,
        node_key: Option<NodeKey>,
        defaults: &IdentityDefaults,
        seen_at: OffsetDateTime,
    ) -> Result<NodeHandle, ValidationError> {
        let cluster_key = cluster_key.ok_or(ValidationError::MissingClusterKey)?;
        let node_key = node_key.ok_or(ValidationError::MissingNodeKey)?;

        let handle = self.db.write(|t| {
            if !t.clusters.contains_key(&cluster_key) {
                let cluster = Cluster {
                    key: cluster_key,
                    name: defaults.cluster.name.clone(),
                    kind: defaults.cluster.kind,
                    refresh_rate_ms: defaults.cluster.refresh_rate.as_millis() as u64,
                    created_at: seen_at,
                };
                info!(cluster = cluster_key, name = %cluster.name, "created cluster");
                t.clusters.insert(cluster_key, cluster);
            }

            if let Some(&handle) = t.node_index.get(&(cluster_key, node_key)) {
                if let Some(node) = t.nodes.get_mut(&handle) {
                    node.refresh(&defaults.node, seen_at);
                }
                return handle;
            }

            let handle = t.mint_handle();
            let node = Node {
                handle,
                cluster_key,
                node_key,
                address: defaults.node.address.clone(),
                os: defaults.node.os.clone(),
                uptime_secs: defaults.node.uptime_secs,
                first_seen: seen_at,
                last_seen: seen_at,
            };
            info!(cluster = cluster_key, node = node_key, %handle, address = %node.address, "created node");
            t.nodes.insert(handle, node);
            t.node_index.insert((cluster_key, node_key), handle);
            t.series.entry(handle).or_default();
            handle
        });

        Ok(handle)
    }

    pub fn cluster(&self, key: ClusterKey) -> Option<Cluster> {
        self.db.read(|t| t.clusters.get(&key).cloned())
    }

    /// All clusters ordered by key.
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut clusters = self.db.read(|t| t.clusters.values().cloned().collect::<Vec<_>>());
        clusters.sort_by_key(|c| c.key);
        clusters
    }

    /// Nodes of one cluster ordered by node key.
    pub fn nodes(&self, cluster_key: ClusterKey) -> Vec<Node> {
        let mut nodes = self.db.read(|t| {
            t.nodes
                .values()
                .filter(|n| n.cluster_key == cluster_key)
                .cloned()
                .collect::<Vec<_>>()
        });
        nodes.sort_by_key(|n| n.node_key);
        nodes
    }

    pub fn node(&self, handle: NodeHandle) -> Option<Node> {
        self.db.read(|t| t.nodes.get(&handle).cloned())
    }

    pub fn lookup(&self, cluster_key: ClusterKey, node_key: NodeKey) -> Option<NodeHandle> {
        self.db.read(|t| t.node_index.get(&(cluster_key, node_key)).copied())
    }

    pub fn cluster_count(&self) -> usize {
        self.db.read(|t| t.clusters.len())
    }

    pub fn node_count(&self) -> usize {
        self.db.read(|t| t.nodes.len())
    }
}
