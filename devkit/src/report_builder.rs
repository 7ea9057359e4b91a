/*!
Construction de rapports de nœud pour les tests
*/

use jetson_kernel::models::{ClusterKey, NodeKey, NodeReport, PowerReading};
use serde_json::Value;

/// Builds a valid report by default: two cores at 50 %, 5 MB free,
/// 100 000 MB used, 10 A at 5 V.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    report: NodeReport,
}

impl ReportBuilder {
    pub fn new(cluster: ClusterKey, node: NodeKey) -> Self {
        Self {
            report: NodeReport {
                cluster_id: Some(cluster),
                node_id: Some(node),
                memory_free: 5,
                memory_used: 100_000,
                node_ip: format!("10.{cluster}.0.{node}"),
                cores: vec![50.0, 50.0],
                os: "L4T R32.4".into(),
                uptime: 60,
                frequency: 0,
                power: Some(PowerReading { current: 10.0, voltage: 5.0, power: None }),
            },
        }
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.report.node_ip = ip.into();
        self
    }

    pub fn os(mut self, os: &str) -> Self {
        self.report.os = os.into();
        self
    }

    pub fn uptime(mut self, secs: u64) -> Self {
        self.report.uptime = secs;
        self
    }

    pub fn memory(mut self, free_mb: u64, used_mb: u64) -> Self {
        self.report.memory_free = free_mb;
        self.report.memory_used = used_mb;
        self
    }

    pub fn cores(mut self, cores: &[f32]) -> Self {
        self.report.cores = cores.to_vec();
        self
    }

    pub fn frequency(mut self, hz: u32) -> Self {
        self.report.frequency = hz;
        self
    }

    pub fn power(mut self, current: f32, voltage: f32) -> Self {
        self.report.power = Some(PowerReading { current, voltage, power: None });
        self
    }

    pub fn without_power(mut self) -> Self {
        self.report.power = None;
        self
    }

    pub fn without_cluster(mut self) -> Self {
        self.report.cluster_id = None;
        self
    }

    pub fn without_node(mut self) -> Self {
        self.report.node_id = None;
        self
    }

    pub fn build(self) -> NodeReport {
        self.report
    }

    /// camelCase JSON, as pushed by the node agent.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.report).unwrap_or(Value::Null)
    }
}
