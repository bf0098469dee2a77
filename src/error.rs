//! Top-level worker error type.

use thiserror::Error;

use crate::models::{
    EntityIdParseError, JobId, JobSpecError, MissingLegacyCursor, PageSizeExceeded, WorkPhase, WorkShard,
};
use crate::processor::ProcessorError;
use crate::storage::StorageError;

/// Errors raised by a scan worker.
///
/// Protocol violations (see [`WorkerError::is_protocol_violation`]) are
/// reported back to the coordinator and leave the worker state untouched.
/// Every other error means the worker cannot safely continue and should be
/// restarted from its last persisted state.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Initialize while a different job is active.
    #[error("Got a request to initialize job {requested}, but we already have a different job {active}")]
    DifferentJobActive {
        /// Job the coordinator asked for.
        requested: JobId,
        /// Job the worker has.
        active: JobId,
    },

    /// Initialize of the active job when it is no longer paused.
    #[error("Got a request to initialize job {job_id}, but we already have it in {phase} phase")]
    AlreadyStarted {
        /// The job.
        job_id: JobId,
        /// Its current phase.
        phase: WorkPhase,
    },

    /// A command that needs an active job, but there is none.
    #[error("Got a request to {command} job, but we have no job")]
    NoActiveJob {
        /// The command, e.g. "resume".
        command: &'static str,
    },

    /// Clean stop of a job that has not finished.
    #[error("Got a request to stop Finished job but ours ({job_id}) has phase {phase}")]
    NotFinished {
        /// The job.
        job_id: JobId,
        /// Its current phase.
        phase: WorkPhase,
    },

    /// The work shard handed to initialize is out of range.
    #[error("Invalid work shard {}/{}", .0.worker_index, .0.num_workers)]
    InvalidWorkShard(WorkShard),

    /// The job spec handed to initialize cannot be worked on.
    #[error("Invalid spec for job {job_id}: {source}")]
    InvalidJobSpec {
        /// The job.
        job_id: JobId,
        /// What is wrong with the spec.
        #[source]
        source: JobSpecError,
    },

    /// The range query broke its paging contract.
    #[error(transparent)]
    PageSizeExceeded(#[from] PageSizeExceeded),

    /// Persisted cursors are missing.
    #[error(transparent)]
    MissingLegacyCursor(#[from] MissingLegacyCursor),

    /// The persisted record has a schema this build cannot read.
    #[error("Unsupported worker state schema version {version} (supported {oldest}..={current})")]
    UnsupportedSchemaVersion {
        /// Version found in the record.
        version: u32,
        /// Oldest supported version.
        oldest: u32,
        /// Current version.
        current: u32,
    },

    /// A scan range reached past the entity id value space.
    #[error("Cannot build scan range key: {0}")]
    EntityId(#[from] EntityIdParseError),

    /// Encoding or decoding the worker state failed.
    #[error("Failed to encode or decode worker state: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Processor failure.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// The worker stopped running after an earlier failure.
    #[error("Worker crashed: {reason}")]
    Crashed {
        /// Description of the failure.
        reason: String,
    },

    /// The worker task is no longer running.
    #[error("Worker is not running")]
    WorkerGone,
}

impl WorkerError {
    /// Returns true for misuse of the command protocol.
    ///
    /// These are reported to the caller and the worker keeps running; all
    /// other errors end the worker.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::DifferentJobActive { .. }
                | Self::AlreadyStarted { .. }
                | Self::NoActiveJob { .. }
                | Self::NotFinished { .. }
                | Self::InvalidWorkShard(_)
                | Self::InvalidJobSpec { .. }
        )
    }

    /// Returns a helpful suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::DifferentJobActive { .. } | Self::AlreadyStarted { .. } => {
                "The coordinator and the worker disagree about the active job. Stop the \
                 worker's job with a cancel before initializing a new one."
            }
            Self::NoActiveJob { .. } => "Initialize a job on the worker before resuming or pausing it.",
            Self::NotFinished { .. } => {
                "Only finished jobs can be stopped cleanly. Use a cancel stop to abandon a \
                 job that is still paused or running."
            }
            Self::InvalidWorkShard(_) => "The worker index must be less than the number of workers.",
            Self::InvalidJobSpec { .. } => {
                "Check that the processor kind is registered on the worker, that its \
                 parameters are valid and that the upper bound fits in the entity id values."
            }
            Self::PageSizeExceeded(_) => {
                "The database returned more items than requested. This is a bug in the \
                 database's paged range query."
            }
            Self::MissingLegacyCursor(_) | Self::Serialization(_) | Self::EntityId(_) => {
                "The persisted worker state is corrupted. Inspect the worker record."
            }
            Self::UnsupportedSchemaVersion { .. } => {
                "The worker record was written by a newer or much older version. Run a \
                 matching version of the worker."
            }
            Self::Storage(e) => e.suggestion(),
            Self::Processor(_) => "Check the processor's error message for details.",
            Self::Crashed { .. } | Self::WorkerGone => {
                "Restart the worker. It resumes from its last persisted state."
            }
        }
    }

    /// Returns a richly formatted error message with context and suggestions.
    #[must_use]
    pub fn display_rich(&self) -> String {
        format!("Error: {}\n\nSuggestion:\n  {}", self, self.suggestion())
    }
}
