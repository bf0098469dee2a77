//! The scheduling tick: scan, tick, persist and report on their timers.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::WorkerError;
use crate::models::WorkPhase;

use super::{scan_next_batch, ScanWorker};

impl ScanWorker {
    /// Runs one scheduling tick at the current time.
    ///
    /// # Errors
    ///
    /// See [`ScanWorker::update_active_job_at`].
    pub async fn update_active_job(&mut self) -> Result<Option<Duration>, WorkerError> {
        self.update_active_job_at(Instant::now()).await
    }

    /// Runs one scheduling tick at `now` and returns the delay until the next
    /// one, or `None` if there is no active job and scheduling stops.
    ///
    /// While Running, scans, ticks and persists the job as their timers come
    /// due, and marks it Finished once everything is scanned and processed.
    /// In every phase, sends a status report when the status timer is due.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` on any scan, processor or persist failure. The
    /// worker must not continue after an error.
    pub async fn update_active_job_at(&mut self, now: Instant) -> Result<Option<Duration>, WorkerError> {
        let Some(phase) = self.phase() else {
            return Ok(None);
        };
        if self.timers.is_none() {
            self.init_timers(now);
        }

        if phase == WorkPhase::Running {
            self.update_running_job(now).await?;
        }

        let status_interval = self.config.status_report_interval();
        let status = match (self.active_job.as_mut(), self.timers.as_mut()) {
            (Some(job), Some(timers)) if now >= timers.next_status_report_at => {
                timers.next_status_report_at = now + status_interval;
                Some(job.observe_status())
            }
            _ => None,
        };
        if let Some(status) = status {
            self.send_status_report(status);
        }

        Ok(Some(self.delay_until_next_update(now)))
    }

    /// Delay from `now` until the next scheduling tick.
    #[must_use]
    pub fn delay_until_next_update(&self, now: Instant) -> Duration {
        let max_delay = self.config.max_tick_delay();
        match (self.phase(), self.timers.as_ref()) {
            (Some(phase), Some(timers)) => timers.delay_until_next_update(phase, now, max_delay),
            _ => max_delay,
        }
    }

    async fn update_running_job(&mut self, now: Instant) -> Result<(), WorkerError> {
        let mut reset_crash_stall = false;
        if let (Some(job), Some(timers)) = (self.active_job.as_mut(), self.timers.as_mut()) {
            if now >= timers.next_scan_at {
                timers.next_scan_at = now + job.processor.scan_interval();
                if job.processor.can_currently_process_more_items() && job.has_more_items_to_scan() {
                    let batch =
                        scan_next_batch(job, self.deps.database.as_ref(), self.deps.metrics.as_ref()).await?;
                    if !batch.is_empty() {
                        job.processor.start_process_item_batch(batch).await?;
                    }
                    if job.crash_stall_counter > 0 {
                        tracing::info!(
                            worker_id = %self.worker_id,
                            job_id = %job.id,
                            crash_stall_counter = job.crash_stall_counter,
                            "Scan succeeded after load, resetting crash-stall counter"
                        );
                        job.crash_stall_counter = 0;
                        reset_crash_stall = true;
                    }
                }
            }
        }
        if reset_crash_stall {
            self.persist_state(false).await?;
        }

        if let (Some(job), Some(timers)) = (self.active_job.as_mut(), self.timers.as_mut()) {
            if now >= timers.next_processor_tick_at {
                timers.next_processor_tick_at = now + job.processor.tick_interval();
                job.processor.tick().await?;
            }
        }

        let Some(job) = self.active_job.as_mut() else {
            return Ok(());
        };
        if !job.has_more_items_to_scan() && job.processor.has_completed_all_work_so_far() {
            job.phase = WorkPhase::Finished;
            tracing::info!(
                worker_id = %self.worker_id,
                job_id = %job.id,
                num_items_scanned = job.scan_statistics.num_items_scanned,
                "Job finished"
            );
            self.persist_state(false).await?;
        } else if self.timers.as_ref().is_some_and(|timers| now >= timers.next_persist_at) {
            let persist_interval = job.processor.persist_interval();
            self.persist_state(false).await?;
            if let Some(timers) = self.timers.as_mut() {
                timers.next_persist_at = now + persist_interval;
            }
        }
        Ok(())
    }
}
