use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

pub type ClusterKey = u32;
pub type NodeKey = u32;

/// Surrogate identity of a node, used as the foreign key of every series row.
/// Minted once at node creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(pub u64);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    #[default]
    Jetson,
    RaspberryPi,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub key: ClusterKey,
    pub name: String,
    pub kind: ClusterKind,
    pub refresh_rate_ms: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub handle: NodeHandle,
    pub cluster_key: ClusterKey,
    pub node_key: NodeKey,
    pub address: String,
    pub os: String,
    pub uptime_secs: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl Node {
    /// Last write wins; empty values from a sparse report keep the stored ones.
    pub(crate) fn refresh(&mut self, latest: &NodeDefaults, seen_at: OffsetDateTime) {
        if !latest.address.is_empty() {
            self.address = latest.address.clone();
        }
        if !latest.os.is_empty() {
            self.os = latest.os.clone();
        }
        self.uptime_secs = latest.uptime_secs;
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuCore {
    pub core_number: u32,
    pub utilization: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub node: NodeHandle,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub memory_available_mb: u64,
    pub memory_used_mb: u64,
    pub cores: Vec<CpuCore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    pub node: NodeHandle,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub current: f32,
    pub voltage: f32,
    pub power: f32,
}

/// Attributes used when a cluster is seen for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDefaults {
    pub name: String,
    pub kind: ClusterKind,
    pub refresh_rate: Duration,
}

impl ClusterDefaults {
    pub fn for_key(key: ClusterKey) -> Self {
        Self {
            name: format!("cluster-{key}"),
            kind: ClusterKind::Jetson,
            refresh_rate: Duration::from_secs(5),
        }
    }
}

/// Mutable node attributes carried by every report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDefaults {
    pub address: String,
    pub os: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityDefaults {
    pub cluster: ClusterDefaults,
    pub node: NodeDefaults,
}

/// Power rail reading as reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub current: f32,
    pub voltage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f32>,
}

impl PowerReading {
    pub fn watts(&self) -> f32 {
        self.power.unwrap_or(self.current * self.voltage)
    }
}

/// Inbound report from a node (pull response, HTTP push body or MQTT payload).
///
/// Field names follow the node agent's camelCase JSON; snake_case aliases are
/// accepted for older reporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    #[serde(default, alias = "cluster_id")]
    pub cluster_id: Option<ClusterKey>,
    #[serde(default, alias = "node_id")]
    pub node_id: Option<NodeKey>,
    /// MB
    #[serde(default, alias = "memory_free")]
    pub memory_free: u64,
    /// MB
    #[serde(default, alias = "memory_used")]
    pub memory_used: u64,
    #[serde(default, alias = "node_ip")]
    pub node_ip: String,
    /// Per-core utilization in percent, index = core number.
    #[serde(default)]
    pub cores: Vec<f32>,
    #[serde(default)]
    pub os: String,
    /// Seconds
    #[serde(default)]
    pub uptime: u64,
    /// Report frequency in Hz; 0 keeps the poller's configured cadence.
    #[serde(default)]
    pub frequency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerReading>,
}

impl NodeReport {
    pub fn node_defaults(&self) -> NodeDefaults {
        NodeDefaults {
            address: self.node_ip.clone(),
            os: self.os.clone(),
            uptime_secs: self.uptime,
        }
    }

    pub fn to_utilization(&self, node: NodeHandle, timestamp: OffsetDateTime) -> UtilizationSample {
        UtilizationSample {
            node,
            timestamp,
            memory_available_mb: self.memory_free,
            memory_used_mb: self.memory_used,
            cores: self
                .cores
                .iter()
                .enumerate()
                .map(|(i, &utilization)| CpuCore { core_number: i as u32, utilization })
                .collect(),
        }
    }

    pub fn to_power(&self, node: NodeHandle, timestamp: OffsetDateTime) -> PowerSample {
        let reading = self.power.unwrap_or_default();
        PowerSample {
            node,
            timestamp,
            current: reading.current,
            voltage: reading.voltage,
            power: reading.watts(),
        }
    }
}
