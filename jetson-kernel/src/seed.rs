//! Synthetic fleet history, for exercising retention and the reporting API
//! against a realistic volume of rows.

use crate::error::IngestError;
use crate::ingest::Ingestor;
use crate::models::{ClusterKey, NodeReport, PowerReading};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub cluster: ClusterKey,
    pub nodes: u32,
    pub days: u32,
    pub step: Duration,
    pub start: OffsetDateTime,
}

impl SeedPlan {
    /// History ending now, one entry per node every `step`.
    pub fn ending_now(cluster: ClusterKey, nodes: u32, days: u32, step: Duration) -> Self {
        let start = OffsetDateTime::now_utc() - time::Duration::days(i64::from(days));
        Self { cluster, nodes, days, step, start }
    }

    pub fn entries(&self) -> u64 {
        let span = u64::from(self.days) * 24 * 3600;
        let step = self.step.as_secs().max(1);
        span / step
    }
}

/// Report for entry `i` of node `node`. Values are derived from the entry
/// index so repeated runs produce the same history.
pub fn synthetic_report(cluster: ClusterKey, node: u32, i: u64) -> NodeReport {
    let f = i as f32;
    NodeReport {
        cluster_id: Some(cluster),
        node_id: Some(node),
        memory_free: 5,
        memory_used: 100 * 1000,
        node_ip: format!("10.{cluster}.0.{node}"),
        cores: vec![((i / 2) % 101) as f32, ((i % 7500) % 101) as f32],
        os: "L4T".into(),
        uptime: i,
        frequency: 0,
        power: Some(PowerReading {
            current: (f / 3.0) % 744.0,
            voltage: (f / 4.0) % 4.0,
            power: Some((f / 1000.0) * (f / 2000.0)),
        }),
    }
}

/// Writes the whole plan through the regular ingestion path. Returns the
/// number of pairs stored.
pub fn seed(ingestor: &Ingestor, plan: &SeedPlan) -> Result<u64, IngestError> {
    let step = time::Duration::seconds(plan.step.as_secs().max(1) as i64);
    let per_day = (24 * 3600 / plan.step.as_secs().max(1)).max(1);
    let mut stored = 0;

    for i in 0..plan.entries() {
        let at = plan.start + step * (i as i32);
        for node in 0..plan.nodes {
            ingestor.ingest_at(&synthetic_report(plan.cluster, node, i), at)?;
            stored += 1;
        }
        if (i + 1) % per_day == 0 {
            info!("seeded day {} of {}", (i + 1) / per_day, plan.days);
        }
    }

    info!(cluster = plan.cluster, nodes = plan.nodes, "seeded {stored} sample pair(s)");
    Ok(stored)
}
