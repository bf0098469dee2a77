//! Test: partitioning and complete coverage of a scan by several workers.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use serde_json::json;
use shardscan::models::{
    EntityId, JobId, JobSpec, JobSpecError, ProcessorSpec, ShardCursor, ShardIteratorSet, WorkPhase,
    WorkShard, ENTITY_ID_MAX_VALUE,
};
use shardscan::scan::entity_id_range_from_work_shard;
use shardscan::WorkerError;

use crate::common::{
    collect_spec, player, run_until_finished, spread_values, TestEnv, COLLECT_PROCESSOR_KIND,
};

fn keys(values: &[u64]) -> BTreeSet<String> {
    values
        .iter()
        .map(|&value| EntityId::new(player(), value).to_string())
        .collect()
}

#[test]
fn test_four_workers_split_small_space() {
    let ranges: Vec<(u64, u64)> = (0..4)
        .map(|i| {
            let range = entity_id_range_from_work_shard(&player(), 100, WorkShard::new(i, 4)).unwrap();
            (range.first_inclusive, range.last_inclusive)
        })
        .collect();
    assert_eq!(ranges, vec![(0, 24), (25, 49), (50, 74), (75, 99)]);
}

#[test]
fn test_ranges_are_contiguous_for_uneven_split() {
    let upper = 1_000_003;
    let mut next = 0;
    for i in 0..7 {
        let range = entity_id_range_from_work_shard(&player(), upper, WorkShard::new(i, 7)).unwrap();
        assert_eq!(range.first_inclusive, next);
        assert!(range.last_inclusive >= range.first_inclusive);
        next = range.last_inclusive + 1;
    }
    assert_eq!(next, upper);
}

#[test]
fn test_valid_shard_index_skips_finished_and_is_idempotent() {
    let fresh = ShardCursor::start();
    let done = ShardCursor::end();
    let cases: Vec<(Vec<ShardCursor>, usize, usize)> = vec![
        (vec![fresh.clone(), fresh.clone(), fresh.clone()], 1, 1),
        (vec![fresh.clone(), done.clone(), fresh.clone()], 1, 2),
        (vec![fresh.clone(), done.clone(), done.clone()], 1, 0),
        (vec![done.clone(), fresh.clone()], 5, 1),
        (vec![done.clone(), done.clone()], 3, 1),
    ];
    for (cursors, index, expected) in cases {
        let valid = ShardIteratorSet::valid_shard_index(index, &cursors);
        assert_eq!(valid, expected, "index {index} over {cursors:?}");
        assert!(valid < cursors.len());
        assert_eq!(ShardIteratorSet::valid_shard_index(valid, &cursors), valid);
        if cursors.iter().any(|c| !c.is_finished) {
            assert!(!cursors[valid].is_finished);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_workers_together_see_every_entity_once() {
    let values = spread_values(400);
    let env = TestEnv::new(3, values.iter().copied()).await;
    let job_id = JobId::new();

    let mut workers = Vec::new();
    for i in 0..4 {
        let mut worker = env.load_worker(&format!("w{i}")).await;
        worker
            .ensure_initialized(job_id, collect_spec(16), WorkShard::new(i, 4))
            .await
            .unwrap();
        workers.push(worker);
    }
    for worker in &mut workers {
        worker.ensure_resumed().await.unwrap();
    }
    for worker in &mut workers {
        run_until_finished(worker, 200).await;
    }

    let seen = env.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), values.len(), "no entity is seen twice");
    assert_eq!(env.distinct_seen(), keys(&values));

    let mut total = 0;
    for worker in &workers {
        let job = worker.active_job().unwrap();
        assert_eq!(job.phase, WorkPhase::Finished);
        assert!(job.iterators.all_finished());
        assert!((job.scan_statistics.scanned_ratio_estimate - 1.0).abs() < f32::EPSILON);
        total += job.scan_statistics.num_items_scanned;
    }
    assert_eq!(total, values.len() as u64);
    assert_eq!(env.metrics.items_queried.load(Ordering::SeqCst), total);
}

#[tokio::test(start_paused = true)]
async fn test_entities_outside_upper_bound_are_skipped() {
    let env = TestEnv::new(2, [1, 5, 9, 10, 11, 50]).await;
    let mut worker = env.load_worker("w0").await;
    let spec = collect_spec(4).with_upper_bound(10);
    worker.ensure_initialized(JobId::new(), spec, WorkShard::new(0, 1)).await.unwrap();
    worker.ensure_resumed().await.unwrap();
    run_until_finished(&mut worker, 20).await;

    assert_eq!(env.distinct_seen(), keys(&[1, 5, 9]));
}

#[tokio::test(start_paused = true)]
async fn test_upper_bound_past_value_space_is_rejected() {
    let env = TestEnv::new(2, [1, 5, 9, 100]).await;
    for i in 0..4 {
        let mut worker = env.load_worker(&format!("w{i}")).await;
        let spec = collect_spec(16).with_upper_bound(ENTITY_ID_MAX_VALUE * 4);
        let err = worker
            .ensure_initialized(JobId::new(), spec, WorkShard::new(i, 4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::InvalidJobSpec { source: JobSpecError::UpperBoundTooLarge { .. }, .. }
        ));
        assert!(err.is_protocol_violation());
        assert!(!worker.has_active_job());
    }
    assert_eq!(env.store.num_writes(), 0);

    // The largest accepted bound still covers every entity exactly once.
    let job_id = JobId::new();
    let mut workers = Vec::new();
    for i in 0..4 {
        let mut worker = env.load_worker(&format!("w{i}")).await;
        let spec = collect_spec(16).with_upper_bound(ENTITY_ID_MAX_VALUE);
        worker.ensure_initialized(job_id, spec, WorkShard::new(i, 4)).await.unwrap();
        worker.ensure_resumed().await.unwrap();
        workers.push(worker);
    }
    for worker in &mut workers {
        run_until_finished(worker, 20).await;
    }
    assert_eq!(env.seen.lock().unwrap().len(), 4);
    assert_eq!(env.distinct_seen(), keys(&[1, 5, 9, 100]));
}

#[tokio::test(start_paused = true)]
async fn test_more_workers_than_values_see_every_entity_once() {
    let env = TestEnv::new(2, [0, 1]).await;
    let job_id = JobId::new();

    let mut workers = Vec::new();
    for i in 0..4 {
        let mut worker = env.load_worker(&format!("w{i}")).await;
        let spec = collect_spec(16).with_upper_bound(2);
        worker.ensure_initialized(job_id, spec, WorkShard::new(i, 4)).await.unwrap();
        worker.ensure_resumed().await.unwrap();
        workers.push(worker);
    }
    for worker in &mut workers {
        run_until_finished(worker, 20).await;
    }

    assert_eq!(env.seen.lock().unwrap().len(), 2);
    assert_eq!(env.distinct_seen(), keys(&[0, 1]));

    let scanned: Vec<u64> = workers
        .iter()
        .map(|worker| {
            let job = worker.active_job().unwrap();
            assert_eq!(job.phase, WorkPhase::Finished);
            assert!((job.scan_statistics.scanned_ratio_estimate - 1.0).abs() < f32::EPSILON);
            job.scan_statistics.num_items_scanned
        })
        .collect();
    assert_eq!(scanned, vec![0, 1, 0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_upper_bound_finishes_without_scanning() {
    let env = TestEnv::new(2, 1..=10).await;
    let mut worker = env.load_worker("w0").await;
    let spec = collect_spec(4).with_upper_bound(0);
    worker.ensure_initialized(JobId::new(), spec, WorkShard::new(0, 1)).await.unwrap();
    worker.ensure_resumed().await.unwrap();
    run_until_finished(&mut worker, 5).await;

    assert!(env.distinct_seen().is_empty());
    assert_eq!(env.metrics.items_queried.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_list_visits_listed_entities() {
    let env = TestEnv::new(2, 1..=100).await;
    let listed: Vec<EntityId> = [3, 42, 77, 1_000]
        .into_iter()
        .map(|value| EntityId::new(player(), value))
        .collect();
    let spec = JobSpec::explicit_list(
        player(),
        listed,
        ProcessorSpec::new(COLLECT_PROCESSOR_KIND).with_params(json!({ "batch_size": 1 })),
    );

    let mut worker = env.load_worker("w0").await;
    worker.ensure_initialized(JobId::new(), spec, WorkShard::new(0, 1)).await.unwrap();
    worker.ensure_resumed().await.unwrap();
    run_until_finished(&mut worker, 20).await;

    // The missing entity is skipped.
    assert_eq!(env.distinct_seen(), keys(&[3, 42, 77]));
    let job = worker.active_job().unwrap();
    assert_eq!(job.explicit_list_index, 4);
    assert_eq!(job.scan_statistics.num_items_scanned, 3);
    assert!((job.scan_statistics.scanned_ratio_estimate - 1.0).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_empty_database_finishes_immediately() {
    let env = TestEnv::new(3, std::iter::empty()).await;
    let mut worker = env.load_worker("w0").await;
    worker
        .ensure_initialized(JobId::new(), collect_spec(10), WorkShard::new(0, 1))
        .await
        .unwrap();
    worker.ensure_resumed().await.unwrap();
    let ticks = run_until_finished(&mut worker, 10).await;
    assert!(ticks <= 3);
    assert!(env.distinct_seen().is_empty());
}
