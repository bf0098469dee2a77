//! Test: crash-stall counting on load, processor recreation and surrender.

use std::sync::atomic::Ordering;

use shardscan::metrics::CrashStallOutcome;
use shardscan::models::{JobId, JobSpec, WorkPhase, WorkShard};

use crate::common::{player, run_ticks, run_until_finished, touch, TestEnv};

async fn start_running_job(env: &TestEnv, worker_id: &str) {
    let mut worker = env.load_worker(worker_id).await;
    worker
        .ensure_initialized(JobId::new(), JobSpec::range_scan(player(), touch(10)), WorkShard::new(0, 1))
        .await
        .unwrap();
    worker.ensure_resumed().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_loads_escalate_to_surrender() {
    let env = TestEnv::new(1, 1..=500).await;
    start_running_job(&env, "w0").await;

    let mut worker = env.load_worker("w0").await;
    for _ in 1..7 {
        assert_eq!(worker.phase(), Some(WorkPhase::Running));
        worker = env.load_worker("w0").await;
    }

    assert_eq!(worker.phase(), Some(WorkPhase::Finished));
    let stats = &worker.active_job().unwrap().scan_statistics;
    assert_eq!(stats.num_surrendered, 1);
    assert_eq!(stats.num_work_processor_recreations, 4);
    assert_eq!(env.persisted_phase("w0").await, Some(WorkPhase::Finished));
    // Two commands, seven counted loads, five follow-up persists.
    assert_eq!(env.metrics.persists.load(Ordering::SeqCst), 14);

    use CrashStallOutcome::{Recreated, Surrendered, Tolerated};
    assert_eq!(
        env.metrics.crash_stalls(),
        vec![Tolerated, Tolerated, Recreated, Recreated, Recreated, Recreated, Surrendered]
    );

    // A surrendered job no longer counts loads.
    let worker = env.load_worker("w0").await;
    assert_eq!(worker.phase(), Some(WorkPhase::Finished));
    assert_eq!(env.metrics.crash_stalls().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_successful_scan_resets_counter() {
    let env = TestEnv::new(1, 1..=500).await;
    start_running_job(&env, "w0").await;

    for _ in 0..3 {
        env.load_worker("w0").await;
    }
    let mut worker = env.load_worker("w0").await;
    assert_eq!(worker.active_job().unwrap().crash_stall_counter, 4);
    let persisted = env.persisted_state("w0").await.active_job.unwrap();
    assert_eq!(persisted.crash_stall_counter, 4);

    run_ticks(&mut worker, 1).await;
    assert_eq!(worker.active_job().unwrap().crash_stall_counter, 0);
    assert!(worker.active_job().unwrap().scan_statistics.num_items_scanned > 0);
    let persisted = env.persisted_state("w0").await.active_job.unwrap();
    assert_eq!(persisted.crash_stall_counter, 0);

    // Counting starts over after the reset.
    let worker = env.load_worker("w0").await;
    assert_eq!(worker.active_job().unwrap().crash_stall_counter, 1);
    assert_eq!(worker.phase(), Some(WorkPhase::Running));
}

#[tokio::test(start_paused = true)]
async fn test_paused_job_loads_are_not_counted() {
    let env = TestEnv::new(1, 1..=50).await;
    let mut worker = env.load_worker("w0").await;
    worker
        .ensure_initialized(JobId::new(), JobSpec::range_scan(player(), touch(10)), WorkShard::new(0, 1))
        .await
        .unwrap();

    for _ in 0..10 {
        let worker = env.load_worker("w0").await;
        assert_eq!(worker.phase(), Some(WorkPhase::Paused));
        assert_eq!(worker.active_job().unwrap().crash_stall_counter, 0);
    }
    assert!(env.metrics.crash_stalls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reloaded_job_continues_where_it_left_off() {
    let env = TestEnv::new(2, 1..=200).await;
    start_running_job(&env, "w0").await;

    let mut worker = env.load_worker("w0").await;
    run_ticks(&mut worker, 5).await;
    let scanned = worker.active_job().unwrap().scan_statistics.num_items_scanned;
    assert!(scanned > 0);
    // Make sure the progress is on disk before the simulated crash.
    worker.persist_state(false).await.unwrap();
    drop(worker);

    let mut worker = env.load_worker("w0").await;
    assert_eq!(worker.active_job().unwrap().scan_statistics.num_items_scanned, scanned);
    run_until_finished(&mut worker, 100).await;
    assert_eq!(worker.active_job().unwrap().scan_statistics.num_items_scanned, 200);
}
