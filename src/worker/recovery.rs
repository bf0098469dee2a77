//! Loading persisted state and recovering from crash stalls.

use tokio::time::Instant;

use crate::error::WorkerError;
use crate::metrics::CrashStallOutcome;
use crate::models::{WorkPhase, WorkerStateRecord};
use crate::storage::{PersistedWorkerRecord, CURRENT_SCHEMA_VERSION, OLDEST_SUPPORTED_SCHEMA_VERSION};

use super::{JobWorkState, ScanWorker};

/// Decodes a persisted payload after checking its schema version.
pub(super) fn decode_worker_state(record: &PersistedWorkerRecord) -> Result<WorkerStateRecord, WorkerError> {
    if !record.is_supported_schema() {
        return Err(WorkerError::UnsupportedSchemaVersion {
            version: record.schema_version,
            oldest: OLDEST_SUPPORTED_SCHEMA_VERSION,
            current: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(serde_json::from_slice(&record.payload)?)
}

impl ScanWorker {
    pub(super) fn restore(&mut self, record: &PersistedWorkerRecord) -> Result<(), WorkerError> {
        let state = decode_worker_state(record)?;
        self.active_job = state
            .active_job
            .map(|job| JobWorkState::from_record(job, &self.deps.registry))
            .transpose()?;
        tracing::debug!(
            worker_id = %self.worker_id,
            persisted_at = %record.persisted_at,
            was_final = record.is_final,
            "Restored persisted worker state"
        );
        Ok(())
    }

    pub(super) async fn post_load(&mut self, now: Instant) -> Result<(), WorkerError> {
        let Some(job) = self.active_job.as_mut() else {
            return Ok(());
        };

        let num_db_shards = self.deps.database.num_active_shards().await;
        job.iterators.ensure_migrated(job.work_shard, num_db_shards)?;
        if job.iterators.ensure_consistent_with_num_shards(num_db_shards) {
            tracing::warn!(
                worker_id = %self.worker_id,
                job_id = %job.id,
                num_db_shards,
                "Number of database shards changed, restarted cursors from the lowest unscanned key"
            );
        }

        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            phase = %job.phase,
            work_shard = ?job.work_shard,
            crash_stall_counter = job.crash_stall_counter,
            "Loaded active job"
        );

        self.init_timers(now);
        self.apply_crash_stall_policy().await
    }

    /// Handles a load while the job is Running.
    ///
    /// The job was running when the previous incarnation went away, which
    /// happens on ordinary restarts too. The crash-stall counter goes up on
    /// every such load and back to zero on the first successful scan. A
    /// counter above the recreate threshold gets a fresh processor; above the
    /// surrender threshold the job is marked Finished so it stops crashing
    /// the worker.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if a persist fails or the processor cannot be
    /// recreated.
    pub async fn apply_crash_stall_policy(&mut self) -> Result<(), WorkerError> {
        let Some(job) = self.active_job.as_mut() else {
            return Ok(());
        };
        if job.phase != WorkPhase::Running {
            return Ok(());
        }
        job.crash_stall_counter += 1;
        let counter = job.crash_stall_counter;
        self.persist_state(false).await?;

        let outcome = if counter > self.config.surrender_threshold {
            if let Some(job) = self.active_job.as_mut() {
                job.phase = WorkPhase::Finished;
                job.scan_statistics.num_surrendered = 1;
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    crash_stall_counter = counter,
                    "Job keeps crashing without progress, giving up on it"
                );
            }
            self.persist_state(false).await?;
            CrashStallOutcome::Surrendered
        } else if counter > self.config.recreate_threshold {
            if let Some(job) = self.active_job.as_mut() {
                job.recreate_processor(&self.deps.registry)?;
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    crash_stall_counter = counter,
                    recreations = job.scan_statistics.num_work_processor_recreations,
                    "Job keeps crashing without progress, recreated its processor"
                );
            }
            self.persist_state(false).await?;
            CrashStallOutcome::Recreated
        } else {
            tracing::debug!(
                worker_id = %self.worker_id,
                crash_stall_counter = counter,
                "Loaded running job, counting as possible crash stall"
            );
            CrashStallOutcome::Tolerated
        };

        self.deps.metrics.crash_stall(outcome);
        Ok(())
    }
}
