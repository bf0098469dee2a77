//! Test: spawned workers driven through their handle.

use shardscan::models::{JobId, JobSpec, ProcessorSpec, StopFlavor, WorkPhase, WorkShard};
use shardscan::storage::WorkerStore;
use shardscan::worker::{shutdown_signal, spawn_worker};
use shardscan::WorkerError;

use crate::common::{collect_spec, player, TestEnv, FAILING_PROCESSOR_KIND};

#[tokio::test(start_paused = true)]
async fn test_spawned_worker_runs_job_to_completion() {
    let mut env = TestEnv::new(2, 1..=100).await;
    let worker = env.load_worker("w0").await;
    let (shutdown_tx, shutdown_rx) = shutdown_signal();
    let (handle, task) = spawn_worker(worker, shutdown_rx);
    assert_eq!(handle.worker_id(), "w0");

    let job_id = JobId::new();
    let status = handle
        .ensure_initialized(job_id, collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    assert_eq!(status.phase, WorkPhase::Paused);
    handle.ensure_resumed().await.unwrap();

    loop {
        let report = env.status_rx.recv().await.unwrap();
        assert_eq!(report.worker_id, "w0");
        assert_eq!(report.status.job_id, job_id);
        if report.status.phase == WorkPhase::Finished {
            break;
        }
    }

    let before = handle.ensure_stopped(StopFlavor::Finished).await.unwrap().unwrap();
    assert_eq!(before.scan_statistics.num_items_scanned, 100);
    assert_eq!(env.distinct_seen().len(), 100);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    let record = env.store.try_get("w0").await.unwrap().unwrap();
    assert!(record.is_final);
    assert!(env.persisted_state("w0").await.active_job.is_none());
    assert!(!handle.ensure_awake());
    assert!(matches!(handle.ensure_resumed().await, Err(WorkerError::WorkerGone)));
}

#[tokio::test(start_paused = true)]
async fn test_protocol_violation_keeps_worker_alive() {
    let env = TestEnv::new(1, 1..=10).await;
    let worker = env.load_worker("w0").await;
    let (_shutdown_tx, shutdown_rx) = shutdown_signal();
    let (handle, task) = spawn_worker(worker, shutdown_rx);

    let err = handle.ensure_resumed().await.unwrap_err();
    assert!(matches!(err, WorkerError::NoActiveJob { .. }));
    let stopped = handle.ensure_stopped(StopFlavor::Cancel).await.unwrap();
    assert!(stopped.is_none());

    let job_id = JobId::new();
    handle
        .ensure_initialized(job_id, collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    let err = handle
        .ensure_initialized(JobId::new(), collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::DifferentJobActive { active, .. } if active == job_id));

    assert!(handle.ensure_awake());
    assert_eq!(handle.ensure_paused().await.unwrap().job_id, job_id);

    // Dropping the last handle closes the inbox and ends the worker cleanly.
    drop(handle);
    task.await.unwrap().unwrap();
    assert!(env.store.try_get("w0").await.unwrap().unwrap().is_final);
}

#[tokio::test(start_paused = true)]
async fn test_failed_persist_crashes_worker() {
    let env = TestEnv::new(1, 1..=10).await;
    let worker = env.load_worker("w0").await;
    let (_shutdown_tx, shutdown_rx) = shutdown_signal();
    let (handle, task) = spawn_worker(worker, shutdown_rx);

    handle
        .ensure_initialized(JobId::new(), collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    env.store.set_fail_writes(true);

    let err = handle.ensure_resumed().await.unwrap_err();
    assert!(matches!(err, WorkerError::Crashed { .. }));
    let result = task.await.unwrap();
    assert!(matches!(result, Err(WorkerError::Storage(_))));

    // The last successful persist still says Paused.
    env.store.set_fail_writes(false);
    assert_eq!(env.persisted_phase("w0").await, Some(WorkPhase::Paused));
}

#[tokio::test(start_paused = true)]
async fn test_processor_failure_stops_worker() {
    let env = TestEnv::new(1, 1..=10).await;
    let worker = env.load_worker("w0").await;
    let (_shutdown_tx, shutdown_rx) = shutdown_signal();
    let (handle, task) = spawn_worker(worker, shutdown_rx);

    let spec = JobSpec::range_scan(player(), ProcessorSpec::new(FAILING_PROCESSOR_KIND));
    handle
        .ensure_initialized(JobId::new(), spec, WorkShard::new(0, 1))
        .await
        .unwrap();
    handle.ensure_resumed().await.unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(WorkerError::Processor(_))));
    assert_eq!(env.persisted_phase("w0").await, Some(WorkPhase::Running));
}
