//! Wake-up times of the scheduling loop. Never persisted.

use std::time::Duration;

use tokio::time::Instant;

use crate::models::{WorkPhase, WorkShard};
use crate::processor::ScanProcessor;

/// The four timers of the active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTimers {
    /// When to consider scanning the next batch.
    pub next_scan_at: Instant,
    /// When to tick the processor.
    pub next_processor_tick_at: Instant,
    /// When to persist the worker state.
    pub next_persist_at: Instant,
    /// When to send a status report.
    pub next_status_report_at: Instant,
}

impl RuntimeTimers {
    /// Initial timers for a job.
    ///
    /// Each timer starts `worker_index / num_workers` of its interval from
    /// `now`, so sibling workers of a job take turns instead of waking up
    /// together.
    #[must_use]
    pub fn new_at(
        now: Instant,
        work_shard: WorkShard,
        processor: &dyn ScanProcessor,
        status_report_interval: Duration,
    ) -> Self {
        let factor = work_shard.offset_factor();
        let offset = |interval: Duration| now + interval.mul_f64(factor);
        Self {
            next_scan_at: offset(processor.scan_interval()),
            next_processor_tick_at: offset(processor.tick_interval()),
            next_persist_at: offset(processor.persist_interval()),
            next_status_report_at: offset(status_report_interval),
        }
    }

    /// Earliest timer that matters in `phase`.
    ///
    /// Outside the Running phase only status reports are sent.
    #[must_use]
    pub fn next_update_at(&self, phase: WorkPhase) -> Instant {
        match phase {
            WorkPhase::Running => self
                .next_scan_at
                .min(self.next_processor_tick_at)
                .min(self.next_persist_at)
                .min(self.next_status_report_at),
            WorkPhase::Paused | WorkPhase::Finished => self.next_status_report_at,
        }
    }

    /// Delay from `now` until the next update, clamped to `max_delay`.
    #[must_use]
    pub fn delay_until_next_update(&self, phase: WorkPhase, now: Instant, max_delay: Duration) -> Duration {
        self.next_update_at(phase)
            .saturating_duration_since(now)
            .min(max_delay)
    }
}
