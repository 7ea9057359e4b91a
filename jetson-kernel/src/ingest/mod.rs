/**
 * INGESTION - Chemin commun d'écriture des rapports de nœuds
 *
 * ROLE :
 * Turns one decoded `NodeReport` into durable rows: validate, resolve the
 * node identity through the catalog, append the utilization/power pair.
 * Pull workers, the HTTP push endpoint and the MQTT listener all go through
 * `Ingestor::ingest`, so every entry point shares the same rules.
 */

pub mod transport;
pub mod worker;

use crate::catalog::IdentityCatalog;
use crate::error::{IngestError, ValidationError};
use crate::models::{ClusterDefaults, ClusterKey, IdentityDefaults, NodeHandle, NodeReport};
use crate::store::SampleStore;
use std::collections::HashMap;
use time::OffsetDateTime;

pub use transport::{HttpTransport, Transport};
pub use worker::{cadence_for, IngestionWorker, WorkerPool, WorkerSettings, WorkerStats, WorkerStatsSnapshot};

/// Attributes for clusters created on first sight, keyed by cluster id.
/// Unknown ids fall back to [`ClusterDefaults::for_key`].
#[derive(Debug, Clone, Default)]
pub struct ClusterProfiles {
    profiles: HashMap<ClusterKey, ClusterDefaults>,
}

impl ClusterProfiles {
    pub fn new(profiles: HashMap<ClusterKey, ClusterDefaults>) -> Self {
        Self { profiles }
    }

    pub fn defaults_for(&self, key: ClusterKey) -> ClusterDefaults {
        self.profiles.get(&key).cloned().unwrap_or_else(|| ClusterDefaults::for_key(key))
    }
}

#[derive(Clone)]
pub struct Ingestor {
    catalog: IdentityCatalog,
    store: SampleStore,
    profiles: ClusterProfiles,
}

impl Ingestor {
    pub fn new(catalog: IdentityCatalog, store: SampleStore, profiles: ClusterProfiles) -> Self {
        Self { catalog, store, profiles }
    }

    pub fn catalog(&self) -> &IdentityCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn ingest(&self, report: &NodeReport) -> Result<NodeHandle, IngestError> {
        self.ingest_at(report, OffsetDateTime::now_utc())
    }

    /// One timestamp per cycle: both rows of the pair carry `at`.
    pub fn ingest_at(&self, report: &NodeReport, at: OffsetDateTime) -> Result<NodeHandle, IngestError> {
        validate(report)?;

        let cluster_key = report.cluster_id.ok_or(ValidationError::MissingClusterKey)?;
        let defaults = IdentityDefaults {
            cluster: self.profiles.defaults_for(cluster_key),
            node: report.node_defaults(),
        };
        let handle = self
            .catalog
            .resolve_or_create_at(report.cluster_id, report.node_id, &defaults, at)?;

        self.store
            .append_pair(handle, report.to_utilization(handle, at), report.to_power(handle, at))?;
        Ok(handle)
    }
}

pub fn validate(report: &NodeReport) -> Result<(), ValidationError> {
    if report.cluster_id.is_none() {
        return Err(ValidationError::MissingClusterKey);
    }
    if report.node_id.is_none() {
        return Err(ValidationError::MissingNodeKey);
    }
    for (core, &value) in report.cores.iter().enumerate() {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(ValidationError::CoreUtilization { core, value });
        }
    }
    if let Some(power) = &report.power {
        let finite = power.current.is_finite()
            && power.voltage.is_finite()
            && power.power.map_or(true, f32::is_finite)
            && power.watts().is_finite();
        if !finite {
            return Err(ValidationError::PowerReading);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterKind, PowerReading};
    use crate::state::Database;
    use std::time::Duration;
    use time::macros::datetime;

    fn ingestor() -> Ingestor {
        let db = Database::in_memory().shared();
        let mut profiles = HashMap::new();
        profiles.insert(
            2,
            ClusterDefaults {
                name: "Jetson 2.0".into(),
                kind: ClusterKind::Jetson,
                refresh_rate: Duration::from_secs(5),
            },
        );
        Ingestor::new(
            IdentityCatalog::new(db.clone()),
            SampleStore::new(db),
            ClusterProfiles::new(profiles),
        )
    }

    fn report() -> NodeReport {
        NodeReport {
            cluster_id: Some(2),
            node_id: Some(1),
            memory_free: 5,
            memory_used: 100_000,
            node_ip: "5.4.3.1".into(),
            cores: vec![50.0, 50.0],
            os: "L4T R32".into(),
            uptime: 120,
            frequency: 1,
            power: Some(PowerReading { current: 10.0, voltage: 5.0, power: None }),
        }
    }

    #[test]
    fn test_first_and_second_report_share_one_node() {
        let ingestor = ingestor();
        let t0 = datetime!(2020-03-27 00:00:00 UTC);

        let h1 = ingestor.ingest_at(&report(), t0).unwrap();
        let h2 = ingestor.ingest_at(&report(), t0 + time::Duration::seconds(1)).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(ingestor.catalog().cluster(2).unwrap().name, "Jetson 2.0");
        assert_eq!(ingestor.catalog().node_count(), 1);

        let pairs: Vec<_> = ingestor
            .store()
            .query_range(h1, t0, t0 + time::Duration::seconds(1))
            .iter()
            .collect();
        assert_eq!(pairs.len(), 2);
        let first = &pairs[0];
        assert_eq!(first.timestamp, t0);
        assert_eq!(first.utilization.as_ref().unwrap().memory_used_mb, 100_000);
        assert_eq!(first.power.as_ref().unwrap().power, 50.0);
        assert_eq!(first.power.as_ref().unwrap().timestamp, t0);
    }

    #[test]
    fn test_unconfigured_cluster_gets_generated_defaults() {
        let ingestor = ingestor();
        let mut r = report();
        r.cluster_id = Some(9);
        ingestor.ingest(&r).unwrap();
        assert_eq!(ingestor.catalog().cluster(9).unwrap().name, "cluster-9");
    }

    #[test]
    fn test_invalid_reports_are_dropped_without_side_effects() {
        let ingestor = ingestor();

        let mut no_node = report();
        no_node.node_id = None;
        assert!(matches!(
            ingestor.ingest(&no_node),
            Err(IngestError::Validation(ValidationError::MissingNodeKey))
        ));

        let mut bad_core = report();
        bad_core.cores = vec![10.0, f32::NAN];
        assert!(matches!(
            ingestor.ingest(&bad_core),
            Err(IngestError::Validation(ValidationError::CoreUtilization { core: 1, .. }))
        ));

        let mut bad_power = report();
        bad_power.power = Some(PowerReading { current: f32::INFINITY, voltage: 5.0, power: None });
        assert!(matches!(
            ingestor.ingest(&bad_power),
            Err(IngestError::Validation(ValidationError::PowerReading))
        ));

        assert_eq!(ingestor.catalog().cluster_count(), 0);
        assert_eq!(ingestor.store().utilization_rows(), 0);
    }

    #[test]
    fn test_power_overflowing_to_infinity_is_rejected() {
        let ingestor = ingestor();
        let mut r = report();
        r.power = Some(PowerReading { current: 1e20, voltage: 1e20, power: None });
        assert!(matches!(
            ingestor.ingest(&r),
            Err(IngestError::Validation(ValidationError::PowerReading))
        ));
        assert_eq!(ingestor.store().power_rows(), 0);
    }

    #[test]
    fn test_report_without_power_still_writes_a_pair() {
        let ingestor = ingestor();
        let mut r = report();
        r.power = None;
        ingestor.ingest(&r).unwrap();
        assert_eq!(ingestor.store().utilization_rows(), 1);
        assert_eq!(ingestor.store().power_rows(), 1);
    }
}
