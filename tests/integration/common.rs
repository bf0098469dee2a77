//! Shared fixtures: an in-memory environment, test processors and helpers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use shardscan::config::WorkerConfig;
use shardscan::metrics::{CrashStallOutcome, ScanMetrics};
use shardscan::models::{
    EntityKind, JobSpec, ProcessingStats, ProcessorSpec, WorkPhase, WorkerStateRecord,
    ENTITY_ID_MAX_VALUE,
};
use shardscan::processor::{
    ProcessorError, ProcessorFactory, ProcessorRegistry, ScanProcessor, TOUCH_PROCESSOR_KIND,
};
use shardscan::storage::{MemoryDatabase, MemoryWorkerStore, ScannedItem, WorkerStore};
use shardscan::worker::{ScanWorker, StatusReport, WorkerDeps};
use tokio::sync::mpsc;

/// Kind name of [`CollectingProcessor`].
pub const COLLECT_PROCESSOR_KIND: &str = "collect";
/// Kind name of [`FailingProcessor`].
pub const FAILING_PROCESSOR_KIND: &str = "fail_on_tick";

pub fn player() -> EntityKind {
    EntityKind::new("Player")
}

/// `count` entity values spread evenly over the whole id space.
pub fn spread_values(count: u64) -> Vec<u64> {
    let step = ENTITY_ID_MAX_VALUE / count;
    (0..count).map(|i| i * step + 1).collect()
}

/// Touch processor with short intervals.
pub fn touch(batch_size: usize) -> ProcessorSpec {
    ProcessorSpec::new(TOUCH_PROCESSOR_KIND).with_params(json!({
        "batch_size": batch_size,
        "scan_interval_ms": 10,
        "tick_interval_ms": 10,
        "persist_interval_ms": 100,
    }))
}

/// Range scan of players with the collecting processor.
pub fn collect_spec(batch_size: usize) -> JobSpec {
    JobSpec::range_scan(
        player(),
        ProcessorSpec::new(COLLECT_PROCESSOR_KIND).with_params(json!({ "batch_size": batch_size })),
    )
}

/// Metrics sink that remembers what it was told.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub items_queried: AtomicU64,
    pub persists: AtomicU64,
    pub crash_stalls: Mutex<Vec<CrashStallOutcome>>,
}

impl RecordingMetrics {
    pub fn crash_stalls(&self) -> Vec<CrashStallOutcome> {
        self.crash_stalls.lock().unwrap().clone()
    }
}

impl ScanMetrics for RecordingMetrics {
    fn items_queried(&self, _job_tag: &str, count: u64) {
        self.items_queried.fetch_add(count, Ordering::SeqCst);
    }

    fn persisted(&self, _num_bytes: usize) {
        self.persists.fetch_add(1, Ordering::SeqCst);
    }

    fn crash_stall(&self, outcome: CrashStallOutcome) {
        self.crash_stalls.lock().unwrap().push(outcome);
    }
}

/// Processor that records every key it is handed and finishes batches at once.
pub struct CollectingProcessor {
    batch_size: usize,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ScanProcessor for CollectingProcessor {
    fn desired_scan_batch_size(&self) -> usize {
        self.batch_size
    }

    fn scan_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn persist_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn can_currently_process_more_items(&self) -> bool {
        true
    }

    fn has_completed_all_work_so_far(&self) -> bool {
        true
    }

    async fn start_process_item_batch(&mut self, items: Vec<ScannedItem>) -> Result<(), ProcessorError> {
        self.seen
            .lock()
            .unwrap()
            .extend(items.into_iter().map(|item| item.key));
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn cancel(&mut self) {}

    fn stats(&self) -> ProcessingStats {
        json!({ "seen": self.seen.lock().unwrap().len() })
    }

    fn persisted_state(&self) -> Result<Value, ProcessorError> {
        Ok(json!({}))
    }
}

/// Factory sharing one key log between all processors it creates.
#[derive(Default)]
pub struct CollectingFactory {
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl CollectingFactory {
    fn build(&self, params: &Value) -> Box<dyn ScanProcessor> {
        let batch_size = params
            .get("batch_size")
            .and_then(Value::as_u64)
            .unwrap_or(10);
        Box::new(CollectingProcessor {
            batch_size: usize::try_from(batch_size).unwrap(),
            seen: self.seen.clone(),
        })
    }
}

impl ProcessorFactory for CollectingFactory {
    fn processor_kind(&self) -> &str {
        COLLECT_PROCESSOR_KIND
    }

    fn create(
        &self,
        params: &Value,
        _prior_stats: Option<&ProcessingStats>,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        Ok(self.build(params))
    }

    fn restore(&self, params: &Value, _state: Value) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        Ok(self.build(params))
    }
}

/// Processor whose tick always fails.
pub struct FailingProcessor;

#[async_trait]
impl ScanProcessor for FailingProcessor {
    fn desired_scan_batch_size(&self) -> usize {
        10
    }

    fn scan_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn persist_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn can_currently_process_more_items(&self) -> bool {
        true
    }

    fn has_completed_all_work_so_far(&self) -> bool {
        false
    }

    async fn start_process_item_batch(&mut self, _items: Vec<ScannedItem>) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), ProcessorError> {
        Err(ProcessorError::Failed("disk full".to_string()))
    }

    fn cancel(&mut self) {}

    fn stats(&self) -> ProcessingStats {
        Value::Null
    }

    fn persisted_state(&self) -> Result<Value, ProcessorError> {
        Ok(json!({}))
    }
}

pub struct FailingFactory;

impl ProcessorFactory for FailingFactory {
    fn processor_kind(&self) -> &str {
        FAILING_PROCESSOR_KIND
    }

    fn create(
        &self,
        _params: &Value,
        _prior_stats: Option<&ProcessingStats>,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        Ok(Box::new(FailingProcessor))
    }

    fn restore(&self, _params: &Value, _state: Value) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        Ok(Box::new(FailingProcessor))
    }
}

/// In-memory environment for workers.
pub struct TestEnv {
    pub database: Arc<MemoryDatabase>,
    pub store: Arc<MemoryWorkerStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub seen: Arc<Mutex<Vec<String>>>,
    pub status_rx: mpsc::UnboundedReceiver<StatusReport>,
    pub config: WorkerConfig,
    deps: WorkerDeps,
}

impl TestEnv {
    /// Environment with `num_db_shards` database shards holding `values` as
    /// players.
    pub async fn new(num_db_shards: usize, values: impl IntoIterator<Item = u64> + Send) -> Self {
        let database = Arc::new(MemoryDatabase::new(num_db_shards));
        database.populate(&player(), values).await;
        let store = Arc::new(MemoryWorkerStore::new());
        let metrics = Arc::new(RecordingMetrics::default());

        let collecting = CollectingFactory::default();
        let seen = collecting.seen.clone();
        let mut registry = ProcessorRegistry::with_builtin();
        registry.register(Arc::new(collecting));
        registry.register(Arc::new(FailingFactory));

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let deps = WorkerDeps {
            database: database.clone(),
            store: store.clone(),
            registry: Arc::new(registry),
            metrics: metrics.clone(),
            status_sender: Some(status_tx),
        };
        Self {
            database,
            store,
            metrics,
            seen,
            status_rx,
            config: WorkerConfig::default(),
            deps,
        }
    }

    pub fn deps(&self) -> WorkerDeps {
        self.deps.clone()
    }

    pub async fn load_worker(&self, worker_id: &str) -> ScanWorker {
        ScanWorker::load(worker_id, self.deps(), self.config.clone())
            .await
            .unwrap()
    }

    /// Decoded persisted state of a worker.
    pub async fn persisted_state(&self, worker_id: &str) -> WorkerStateRecord {
        let record = self
            .store
            .try_get(worker_id)
            .await
            .unwrap()
            .expect("worker has a persisted record");
        serde_json::from_slice(&record.payload).unwrap()
    }

    /// Phase of the persisted active job.
    pub async fn persisted_phase(&self, worker_id: &str) -> Option<WorkPhase> {
        self.persisted_state(worker_id)
            .await
            .active_job
            .map(|job| job.phase)
    }

    /// Distinct keys seen by collecting processors.
    pub fn distinct_seen(&self) -> BTreeSet<String> {
        self.seen.lock().unwrap().iter().cloned().collect()
    }
}

/// Drives scheduling ticks a second apart until the job finishes. Returns
/// the number of ticks it took.
///
/// Needs a paused clock (`#[tokio::test(start_paused = true)]`).
pub async fn run_until_finished(worker: &mut ScanWorker, max_ticks: usize) -> usize {
    for tick in 1..=max_ticks {
        tokio::time::advance(Duration::from_secs(1)).await;
        worker.update_active_job().await.unwrap();
        if worker.phase() == Some(WorkPhase::Finished) {
            return tick;
        }
    }
    panic!("job did not finish within {max_ticks} ticks");
}

/// Drives `ticks` scheduling ticks a second apart. Needs a paused clock.
pub async fn run_ticks(worker: &mut ScanWorker, ticks: usize) {
    for _ in 0..ticks {
        tokio::time::advance(Duration::from_secs(1)).await;
        worker.update_active_job().await.unwrap();
    }
}
