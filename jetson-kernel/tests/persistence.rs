use jetson_devkit::test_utils::far_future;
use jetson_devkit::{MockTransport, ReportBuilder, Scripted, TestHarness};
use jetson_kernel::error::{IngestError, ValidationError};
use jetson_kernel::ingest::{ClusterProfiles, WorkerPool, WorkerSettings};
use jetson_kernel::persistence::{spawn_snapshot_task, JsonFilePersistence, SnapshotTask};
use jetson_kernel::state::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::watch;

fn open(path: &std::path::Path) -> TestHarness {
    let db = Database::open(JsonFilePersistence::new(path)).unwrap().shared();
    TestHarness::with_database(db, ClusterProfiles::default())
}

#[test]
fn test_reload_keeps_handles_and_joined_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.json");
    let t0 = datetime!(2020-03-27 00:00:00 UTC);

    let (a, b) = {
        let harness = open(&path);
        let a = harness.ingestor.ingest_at(&ReportBuilder::new(2, 1).build(), t0).unwrap();
        let b = harness.ingestor.ingest_at(&ReportBuilder::new(2, 2).build(), t0).unwrap();
        harness
            .ingestor
            .ingest_at(&ReportBuilder::new(2, 1).power(2.0, 12.0).build(), t0 + time::Duration::seconds(1))
            .unwrap();
        assert!(harness.db.flush().unwrap());
        assert!(!harness.db.flush().unwrap());
        (a, b)
    };

    let harness = open(&path);
    assert_eq!(harness.handle(2, 1), Some(a));
    assert_eq!(harness.handle(2, 2), Some(b));
    assert_eq!(harness.store.utilization_rows(), 3);

    let pairs: Vec<_> = harness
        .store
        .query_range(a, OffsetDateTime::UNIX_EPOCH, far_future())
        .iter()
        .collect();
    assert_eq!(pairs.len(), 2);
    assert!(pairs.iter().all(|p| p.utilization.is_some() && p.power.is_some()));
    assert_eq!(pairs[1].power.as_ref().unwrap().power, 24.0);

    // Re-observing resolves to the stored node, a new pair gets a fresh handle.
    let again = harness.ingestor.ingest_at(&ReportBuilder::new(2, 1).build(), t0).unwrap();
    assert_eq!(again, a);
    let c = harness.ingestor.ingest_at(&ReportBuilder::new(5, 1).build(), t0).unwrap();
    assert!(c > a && c > b);
}

#[tokio::test]
async fn test_snapshot_task_writes_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/telemetry.json");

    let harness = open(&path);
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = spawn_snapshot_task(harness.db.clone(), Duration::from_secs(3600), stop_rx);

    harness.ingestor.ingest(&ReportBuilder::new(1, 0).build()).unwrap();
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

    assert!(path.exists());
    let reopened = open(&path);
    assert_eq!(reopened.catalog.node_count(), 1);
    assert_eq!(reopened.store.power_rows(), 1);
}

#[test]
fn test_extreme_values_survive_reload_and_overflow_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.json");
    let t0 = datetime!(2020-03-27 00:00:00 UTC);
    let huge = 1e19_f32;

    {
        let harness = open(&path);
        let overflowing = ReportBuilder::new(3, 1).power(1e20, 1e20).build();
        assert!(matches!(
            harness.ingestor.ingest_at(&overflowing, t0),
            Err(IngestError::Validation(ValidationError::PowerReading))
        ));

        let extreme = ReportBuilder::new(3, 1)
            .power(huge, huge)
            .memory(u64::MAX, 0)
            .cores(&[0.0, 100.0])
            .os("L4T R32.7.1")
            .uptime(u64::MAX)
            .build();
        harness.ingestor.ingest_at(&extreme, t0).unwrap();
        assert!(harness.db.flush().unwrap());
    }

    let harness = open(&path);
    let node = harness.handle(3, 1).unwrap();
    let stored = harness.catalog.node(node).unwrap();
    assert_eq!(stored.os, "L4T R32.7.1");
    assert_eq!(stored.uptime_secs, u64::MAX);

    let pairs: Vec<_> = harness
        .store
        .query_range(node, OffsetDateTime::UNIX_EPOCH, far_future())
        .iter()
        .collect();
    assert_eq!(pairs.len(), 1);
    let power = pairs[0].power.as_ref().unwrap();
    assert_eq!(power.power, huge * huge);
    assert!(power.power.is_finite());
    let utilization = pairs[0].utilization.as_ref().unwrap();
    assert_eq!(utilization.memory_available_mb, u64::MAX);
    let cores: Vec<f32> = utilization.cores.iter().map(|c| c.utilization).collect();
    assert_eq!(cores, vec![0.0, 100.0]);
}

#[tokio::test]
async fn test_sample_landing_after_stop_is_in_the_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.json");

    {
        let harness = open(&path);
        let snapshots = SnapshotTask::spawn(harness.db.clone(), Duration::from_secs(3600));

        let mock = MockTransport::new();
        mock.push("n1", Scripted::Delayed(Duration::from_millis(300), ReportBuilder::new(4, 1).build()))
            .always("n1", Scripted::Hang);
        let settings = WorkerSettings {
            timeout: Duration::from_secs(5),
            ..WorkerSettings::default()
        };
        let pool = WorkerPool::spawn(vec!["n1".to_string()], Arc::new(mock.clone()), harness.ingestor.clone(), settings);

        let start = Instant::now();
        while mock.calls("n1") == 0 && start.elapsed() < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mock.calls("n1"), 1);
        assert_eq!(harness.store.utilization_rows(), 0);

        // The fetch is still in flight when the pool is told to stop.
        pool.shutdown().await;
        assert_eq!(harness.store.utilization_rows(), 1);
        snapshots.finish().await;
    }

    let reopened = open(&path);
    assert!(reopened.handle(4, 1).is_some());
    assert_eq!(reopened.store.utilization_rows(), 1);
    assert_eq!(reopened.store.power_rows(), 1);
}
