//! Test: database resharding between loads, and loading legacy records.

use chrono::Utc;
use serde_json::json;
use shardscan::models::{EntityId, JobId, JobSpec, WorkPhase, WorkShard};
use shardscan::storage::{PersistedWorkerRecord, CURRENT_SCHEMA_VERSION};
use shardscan::worker::ScanWorker;
use shardscan::WorkerError;

use crate::common::{collect_spec, player, run_ticks, run_until_finished, TestEnv};

fn record(worker_id: &str, schema_version: u32, payload: &serde_json::Value) -> PersistedWorkerRecord {
    PersistedWorkerRecord {
        worker_id: worker_id.to_string(),
        persisted_at: Utc::now(),
        payload: serde_json::to_vec(payload).unwrap(),
        schema_version,
        is_final: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_survives_resharding_without_skipping() {
    let env = TestEnv::new(2, 1..=300).await;
    let mut worker = env.load_worker("w0").await;
    worker
        .ensure_initialized(JobId::new(), collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    worker.ensure_resumed().await.unwrap();
    run_ticks(&mut worker, 6).await;
    worker.ensure_paused().await.unwrap();
    let scanned_before = env.distinct_seen().len();
    assert!(scanned_before > 0 && scanned_before < 300);
    drop(worker);

    env.database.reshard(5).await;
    let mut worker = env.load_worker("w0").await;
    let job = worker.active_job().unwrap();
    assert_eq!(job.phase, WorkPhase::Paused);
    assert_eq!(job.iterators.cursors.len(), 5);
    let next = job.iterators.next_shard_index;
    assert!(!job.iterators.cursors[next].is_finished);

    worker.ensure_resumed().await.unwrap();
    run_until_finished(&mut worker, 500).await;

    // Re-scans are allowed after resharding, skips are not.
    let expected: std::collections::BTreeSet<String> = (1..=300)
        .map(|value| EntityId::new(player(), value).to_string())
        .collect();
    assert_eq!(env.distinct_seen(), expected);
    assert!(env.seen.lock().unwrap().len() >= 300);
}

#[tokio::test(start_paused = true)]
async fn test_finished_scan_stays_finished_after_resharding() {
    let env = TestEnv::new(2, 1..=20).await;
    let mut worker = env.load_worker("w0").await;
    worker
        .ensure_initialized(JobId::new(), collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    worker.ensure_resumed().await.unwrap();
    run_until_finished(&mut worker, 20).await;
    drop(worker);

    env.database.reshard(3).await;
    let worker = env.load_worker("w0").await;
    let job = worker.active_job().unwrap();
    assert_eq!(job.phase, WorkPhase::Finished);
    assert_eq!(job.iterators.cursors.len(), 3);
    assert!(job.iterators.all_finished());
}

#[tokio::test(start_paused = true)]
async fn test_legacy_single_cursor_record_is_migrated() {
    let env = TestEnv::new(3, 1..=90).await;
    let spec: JobSpec = collect_spec(10);
    let payload = json!({
        "active_job": {
            "id": JobId::new(),
            "spec": spec,
            "work_shard": {"worker_index": 0, "num_workers": 1},
            "phase": "running",
            "iterators": {
                "legacy": {"shard_index": 1, "start_key_exclusive": "", "is_finished": false}
            }
        }
    });
    env.store.put(record("w0", CURRENT_SCHEMA_VERSION, &payload)).await;

    let mut worker = env.load_worker("w0").await;
    let job = worker.active_job().unwrap();
    assert_eq!(job.iterators.cursors.len(), 3);
    assert!(job.iterators.cursors[0].is_finished);
    assert!(job.iterators.legacy.is_none());
    assert_eq!(job.crash_stall_counter, 1);

    run_until_finished(&mut worker, 50).await;

    // Shard 0 was done before the migration; shards 1 and 2 get scanned.
    let expected: std::collections::BTreeSet<String> = (1..=90)
        .filter(|value| value % 3 != 0)
        .map(|value| EntityId::new(player(), value).to_string())
        .collect();
    assert_eq!(env.distinct_seen(), expected);

    let persisted = env.persisted_state("w0").await.active_job.unwrap();
    assert_eq!(persisted.phase, WorkPhase::Finished);
    assert!(persisted.iterators.legacy.is_none());
    assert_eq!(persisted.iterators.cursors.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_record_without_any_cursor_fails_to_load() {
    let env = TestEnv::new(1, 1..=10).await;
    let payload = json!({
        "active_job": {
            "id": JobId::new(),
            "spec": collect_spec(10),
            "work_shard": {"worker_index": 0, "num_workers": 1},
            "phase": "paused",
            "iterators": {}
        }
    });
    env.store.put(record("w0", CURRENT_SCHEMA_VERSION, &payload)).await;

    let Err(err) = ScanWorker::load("w0", env.deps(), env.config.clone()).await else {
        panic!("load should fail");
    };
    assert!(matches!(err, WorkerError::MissingLegacyCursor(_)));
}

#[tokio::test(start_paused = true)]
async fn test_newer_schema_fails_to_load() {
    let env = TestEnv::new(1, 1..=10).await;
    let payload = json!({ "active_job": null });
    env.store
        .put(record("w0", CURRENT_SCHEMA_VERSION + 1, &payload))
        .await;

    let Err(err) = ScanWorker::load("w0", env.deps(), env.config.clone()).await else {
        panic!("load should fail");
    };
    assert!(matches!(err, WorkerError::UnsupportedSchemaVersion { .. }));
}
