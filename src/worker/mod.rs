//! Scan worker: owns one work shard of a scan job and drives it to completion.
//!
//! This module provides:
//! - `ScanWorker` - The worker state machine: commands, scheduling, persistence
//! - `JobWorkState` - In-memory state of the active job
//! - `RuntimeTimers` - Wake-up times of the scheduling loop
//! - `WorkerHandle` - Typed client for a spawned worker
//! - `spawn_worker` - Runs a worker on its own task with a command inbox
//! - `shutdown_signal` - Creates a shutdown signal channel
//! - `wait_for_shutdown_signal` - Waits for SIGTERM/SIGINT

mod commands;
mod recovery;
mod runner;
mod scan;
mod schedule;
mod state;
mod timers;

pub use runner::{shutdown_signal, spawn_worker, wait_for_shutdown_signal, WorkerHandle, WorkerMessage};
pub use scan::scan_next_batch;
pub use state::JobWorkState;
pub use timers::RuntimeTimers;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::metrics::ScanMetrics;
use crate::models::{StatusSnapshot, WorkPhase, WorkerStateRecord};
use crate::processor::ProcessorRegistry;
use crate::storage::{PersistedWorkerRecord, ShardedDatabase, WorkerStore, CURRENT_SCHEMA_VERSION};

/// Status of a worker's job, sent to the coordinator periodically.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// The reporting worker.
    pub worker_id: String,
    /// Its job's status.
    pub status: StatusSnapshot,
}

/// Channel on which workers send their status reports.
pub type StatusSender = mpsc::UnboundedSender<StatusReport>;

/// Services a worker depends on.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Database to scan.
    pub database: Arc<dyn ShardedDatabase>,
    /// Store for the worker's persisted state.
    pub store: Arc<dyn WorkerStore>,
    /// Processor factories by kind.
    pub registry: Arc<ProcessorRegistry>,
    /// Metrics sink.
    pub metrics: Arc<dyn ScanMetrics>,
    /// Where status reports go. Reports are dropped if `None`.
    pub status_sender: Option<StatusSender>,
}

impl std::fmt::Debug for WorkerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDeps")
            .field("registry", &self.registry)
            .field("has_status_sender", &self.status_sender.is_some())
            .finish_non_exhaustive()
    }
}

/// A scan worker.
///
/// The worker holds at most one active job. It moves through the job's work
/// shard one database page at a time, feeding items to the job's processor,
/// and persists its state so that a restarted worker resumes where the last
/// persist left off.
///
/// All methods take `&mut self`: commands and scheduling ticks never run
/// concurrently. [`spawn_worker`] serializes them through an inbox.
#[derive(Debug)]
pub struct ScanWorker {
    worker_id: String,
    deps: WorkerDeps,
    config: WorkerConfig,
    active_job: Option<JobWorkState>,
    timers: Option<RuntimeTimers>,
    /// Whether a record exists in the store, so the next write is an update.
    has_persisted_record: bool,
}

impl ScanWorker {
    /// Loads a worker from its persisted state, or starts it fresh if it has
    /// none.
    ///
    /// A job found in the Running phase is counted as a crash stall and may
    /// get its processor recreated or be given up, see
    /// [`ScanWorker::apply_crash_stall_policy`].
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if the state cannot be read, decoded or migrated.
    pub async fn load(
        worker_id: impl Into<String>,
        deps: WorkerDeps,
        config: WorkerConfig,
    ) -> Result<Self, WorkerError> {
        let worker_id = worker_id.into();
        let persisted = deps.store.try_get(&worker_id).await?;

        let mut worker = Self {
            worker_id,
            deps,
            config,
            active_job: None,
            timers: None,
            has_persisted_record: persisted.is_some(),
        };

        match persisted {
            Some(record) => worker.restore(&record)?,
            None => tracing::info!(worker_id = %worker.worker_id, "No persisted state, starting fresh"),
        }
        worker.post_load(Instant::now()).await?;
        Ok(worker)
    }

    /// Returns the worker's unique identifier.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Returns the worker's settings.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the active job, if any.
    #[must_use]
    pub const fn active_job(&self) -> Option<&JobWorkState> {
        self.active_job.as_ref()
    }

    /// Returns true if the worker has a job.
    #[must_use]
    pub const fn has_active_job(&self) -> bool {
        self.active_job.is_some()
    }

    /// Phase of the active job, if any.
    #[must_use]
    pub fn phase(&self) -> Option<WorkPhase> {
        self.active_job.as_ref().map(|job| job.phase)
    }

    /// Timers of the active job, if any.
    #[must_use]
    pub const fn timers(&self) -> Option<&RuntimeTimers> {
        self.timers.as_ref()
    }

    /// Writes the worker state to the store.
    ///
    /// The persist counters of the active job are bumped after the payload is
    /// encoded, so the stored payload counts the persists before it.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if the state cannot be encoded or written.
    pub async fn persist_state(&mut self, is_final: bool) -> Result<(), WorkerError> {
        let record = WorkerStateRecord {
            active_job: self
                .active_job
                .as_ref()
                .map(JobWorkState::to_record)
                .transpose()?,
        };
        let payload = serde_json::to_vec(&record)?;
        let num_bytes = payload.len();

        if let Some(job) = self.active_job.as_mut() {
            job.scan_statistics.worker_persist_count += 1;
            job.scan_statistics.worker_persist_total_bytes += num_bytes as u64;
        }

        let persisted = PersistedWorkerRecord {
            worker_id: self.worker_id.clone(),
            persisted_at: Utc::now(),
            payload,
            schema_version: CURRENT_SCHEMA_VERSION,
            is_final,
        };
        if self.has_persisted_record {
            self.deps.store.update(persisted).await?;
        } else {
            self.deps.store.insert(persisted).await?;
            self.has_persisted_record = true;
        }

        self.deps.metrics.persisted(num_bytes);
        tracing::debug!(
            worker_id = %self.worker_id,
            num_bytes,
            is_final,
            phase = ?self.phase(),
            "Persisted worker state"
        );
        Ok(())
    }

    fn init_timers(&mut self, now: Instant) {
        self.timers = self.active_job.as_ref().map(|job| {
            RuntimeTimers::new_at(
                now,
                job.work_shard,
                job.processor.as_ref(),
                self.config.status_report_interval(),
            )
        });
    }

    fn send_status_report(&self, status: StatusSnapshot) {
        let Some(sender) = &self.deps.status_sender else {
            return;
        };
        let report = StatusReport {
            worker_id: self.worker_id.clone(),
            status,
        };
        if sender.send(report).is_err() {
            tracing::debug!(worker_id = %self.worker_id, "Status report receiver is gone");
        }
    }
}
