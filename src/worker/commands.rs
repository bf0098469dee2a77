//! Coordinator commands.
//!
//! Every command that changes the state persists it before returning, so an
//! acknowledged command survives a crash. Commands are idempotent where the
//! coordinator may resend them.

use tokio::time::Instant;

use crate::error::WorkerError;
use crate::models::{JobId, JobSpec, StatusSnapshot, StopFlavor, WorkPhase, WorkShard};

use super::{JobWorkState, ScanWorker};

impl ScanWorker {
    /// Makes `job_id` the active job, in the Paused phase.
    ///
    /// Repeating the command for the active job while it is still Paused just
    /// returns its status.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation if a different job is active, the active
    /// job has left the Paused phase, the work shard is invalid, the upper
    /// bound does not fit in the entity id values or the processor cannot be
    /// created. Returns other `WorkerError`s if the state
    /// cannot be persisted.
    pub async fn ensure_initialized(
        &mut self,
        job_id: JobId,
        spec: JobSpec,
        work_shard: WorkShard,
    ) -> Result<StatusSnapshot, WorkerError> {
        if let Some(job) = self.active_job.as_mut() {
            if job.id != job_id {
                return Err(WorkerError::DifferentJobActive {
                    requested: job_id,
                    active: job.id,
                });
            }
            if job.phase != WorkPhase::Paused {
                return Err(WorkerError::AlreadyStarted {
                    job_id,
                    phase: job.phase,
                });
            }
            tracing::info!(
                worker_id = %self.worker_id,
                job_id = %job_id,
                "Got a request to initialize job, we already have it"
            );
            return Ok(job.observe_status());
        }

        if !work_shard.is_valid() {
            return Err(WorkerError::InvalidWorkShard(work_shard));
        }
        spec.validate().map_err(|source| WorkerError::InvalidJobSpec { job_id, source })?;
        let processor = self
            .deps
            .registry
            .create(&spec.processor, None)
            .map_err(|source| WorkerError::InvalidJobSpec {
                job_id,
                source: source.into(),
            })?;
        let num_db_shards = self.deps.database.num_active_shards().await;

        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job_id,
            work_shard = ?work_shard,
            entity_kind = %spec.entity_kind,
            processor = %spec.processor.kind,
            list_mode = spec.is_list_mode(),
            num_db_shards,
            "Initializing job"
        );
        self.active_job = Some(JobWorkState::new(job_id, spec, work_shard, num_db_shards, processor));
        self.persist_state(false).await?;
        self.init_timers(Instant::now());
        self.observe_active_status("initialize")
    }

    /// Moves the active job to the Running phase, unless it already left the
    /// Paused phase.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::NoActiveJob` if there is no job, or another
    /// `WorkerError` if the state cannot be persisted.
    pub async fn ensure_resumed(&mut self) -> Result<StatusSnapshot, WorkerError> {
        self.set_phase_if("resume", WorkPhase::Paused, WorkPhase::Running).await
    }

    /// Moves the active job back to the Paused phase if it is Running.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::NoActiveJob` if there is no job, or another
    /// `WorkerError` if the state cannot be persisted.
    pub async fn ensure_paused(&mut self) -> Result<StatusSnapshot, WorkerError> {
        self.set_phase_if("pause", WorkPhase::Running, WorkPhase::Paused).await
    }

    /// Clears the active job and returns its status from just before.
    ///
    /// A `Finished` stop requires the job to be Finished. A `Cancel` stop
    /// cancels the processor unless the job is already Finished. Without an
    /// active job this returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::NotFinished` for a `Finished` stop of an
    /// unfinished job, or another `WorkerError` if the state cannot be
    /// persisted.
    pub async fn ensure_stopped(&mut self, flavor: StopFlavor) -> Result<Option<StatusSnapshot>, WorkerError> {
        let Some(job) = self.active_job.as_mut() else {
            tracing::info!(worker_id = %self.worker_id, flavor = %flavor, "Got a request to stop, but we have no job");
            return Ok(None);
        };
        if flavor == StopFlavor::Finished && job.phase != WorkPhase::Finished {
            return Err(WorkerError::NotFinished {
                job_id: job.id,
                phase: job.phase,
            });
        }

        let status = job.observe_status();
        if job.phase != WorkPhase::Finished {
            job.processor.cancel();
        }
        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            flavor = %flavor,
            phase = %job.phase,
            num_items_scanned = job.scan_statistics.num_items_scanned,
            "Stopping job"
        );

        self.active_job = None;
        self.persist_state(false).await?;
        self.timers = None;
        Ok(Some(status))
    }

    /// Makes sure the worker is running. Changes nothing.
    pub fn ensure_awake(&self) {
        tracing::trace!(worker_id = %self.worker_id, phase = ?self.phase(), "Awake");
    }

    async fn set_phase_if(
        &mut self,
        command: &'static str,
        from: WorkPhase,
        to: WorkPhase,
    ) -> Result<StatusSnapshot, WorkerError> {
        let job = self
            .active_job
            .as_mut()
            .ok_or(WorkerError::NoActiveJob { command })?;
        if job.phase != from {
            tracing::info!(
                worker_id = %self.worker_id,
                job_id = %job.id,
                phase = %job.phase,
                command,
                "Job phase unchanged"
            );
            return Ok(job.observe_status());
        }

        job.phase = to;
        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            from = %from,
            to = %to,
            "Job phase changed"
        );
        self.persist_state(false).await?;
        self.init_timers(Instant::now());
        self.observe_active_status(command)
    }

    fn observe_active_status(&mut self, command: &'static str) -> Result<StatusSnapshot, WorkerError> {
        self.active_job
            .as_mut()
            .map(JobWorkState::observe_status)
            .ok_or(WorkerError::NoActiveJob { command })
    }
}
