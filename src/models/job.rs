//! Job identity, work shards, phases and job specs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::entity_id::{EntityId, EntityKind, ENTITY_ID_MAX_VALUE};
use crate::processor::ProcessorError;

/// Identifier of a logical scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing uuid.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// This worker's piece of a job: piece `worker_index` out of `num_workers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkShard {
    /// Index of this worker among the job's workers.
    pub worker_index: u32,
    /// Total number of workers in the job.
    pub num_workers: u32,
}

impl WorkShard {
    /// Creates a work shard.
    #[must_use]
    pub const fn new(worker_index: u32, num_workers: u32) -> Self {
        Self {
            worker_index,
            num_workers,
        }
    }

    /// Fraction `worker_index / num_workers`, used to phase-shift timers of
    /// sibling workers.
    #[must_use]
    pub fn offset_factor(&self) -> f64 {
        if self.num_workers == 0 {
            return 0.0;
        }
        f64::from(self.worker_index) / f64::from(self.num_workers)
    }

    /// Returns true if the index is within the worker count.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.worker_index < self.num_workers
    }
}

/// Phase of a job on one worker.
///
/// A job starts out `Paused`, is moved to `Running` by the coordinator, and
/// ends up `Finished` either by completing its work or by surrendering.
/// A `Finished` job stays around until the coordinator stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPhase {
    /// Not scanning; work not yet finished. Initial phase.
    Paused,
    /// Scanning the database and processing items.
    Running,
    /// No more work; waiting to be stopped.
    Finished,
}

impl WorkPhase {
    /// Lowercase name for logs and labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker is told to stop its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopFlavor {
    /// Clean stop of a job that is `Finished`.
    Finished,
    /// Cancellation, allowed in any phase.
    Cancel,
}

impl fmt::Display for StopFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

/// Which processor a job uses, and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    /// Processor kind, looked up in the processor registry.
    pub kind: String,
    /// Processor-specific parameters.
    #[serde(default)]
    pub params: Value,
}

impl ProcessorSpec {
    /// Creates a processor spec without parameters.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Null,
        }
    }

    /// Sets the processor parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Reasons a job spec cannot be worked on.
#[derive(Debug, Error)]
pub enum JobSpecError {
    /// The upper bound lies past the entity id value space.
    #[error("entity id value upper bound {upper_bound} is above the maximum {max}")]
    UpperBoundTooLarge {
        /// Upper bound in the spec.
        upper_bound: u64,
        /// Largest accepted upper bound.
        max: u64,
    },

    /// The processor cannot be created.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Description of a scan job, as handed out by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Kind of entity being scanned.
    pub entity_kind: EntityKind,
    /// If set, only these entities are visited instead of scanning the key space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_entity_list: Option<Vec<EntityId>>,
    /// Exclusive upper bound of the entity id value space being partitioned.
    pub entity_id_value_upper_bound: u64,
    /// Operation name passed to the database for range queries.
    pub database_query_op_name: String,
    /// Tag for metrics of this job.
    pub metrics_tag: String,
    /// Processor that handles the scanned items.
    pub processor: ProcessorSpec,
}

impl JobSpec {
    /// Spec for a full key-space scan of `entity_kind`.
    #[must_use]
    pub fn range_scan(entity_kind: EntityKind, processor: ProcessorSpec) -> Self {
        let metrics_tag = processor.kind.clone();
        Self {
            entity_kind,
            explicit_entity_list: None,
            entity_id_value_upper_bound: ENTITY_ID_MAX_VALUE,
            database_query_op_name: "DatabaseScan".to_string(),
            metrics_tag,
            processor,
        }
    }

    /// Spec that visits only the given entities.
    #[must_use]
    pub fn explicit_list(
        entity_kind: EntityKind,
        entities: Vec<EntityId>,
        processor: ProcessorSpec,
    ) -> Self {
        let mut spec = Self::range_scan(entity_kind, processor);
        spec.explicit_entity_list = Some(entities);
        spec
    }

    /// Sets the entity id value upper bound.
    #[must_use]
    pub const fn with_upper_bound(mut self, upper_bound: u64) -> Self {
        self.entity_id_value_upper_bound = upper_bound;
        self
    }

    /// Sets the metrics tag.
    #[must_use]
    pub fn with_metrics_tag(mut self, tag: impl Into<String>) -> Self {
        self.metrics_tag = tag.into();
        self
    }

    /// Sets the database query operation name.
    #[must_use]
    pub fn with_query_op_name(mut self, op_name: impl Into<String>) -> Self {
        self.database_query_op_name = op_name.into();
        self
    }

    /// Returns true if the job visits an explicit list rather than a key range.
    #[must_use]
    pub const fn is_list_mode(&self) -> bool {
        self.explicit_entity_list.is_some()
    }

    /// Checks the parts of the spec that do not depend on the worker.
    ///
    /// # Errors
    ///
    /// Returns `JobSpecError::UpperBoundTooLarge` if the upper bound is above
    /// [`ENTITY_ID_MAX_VALUE`]. Values past it have no entity id, so the
    /// work shards would not map to disjoint key ranges.
    pub const fn validate(&self) -> Result<(), JobSpecError> {
        if self.entity_id_value_upper_bound > ENTITY_ID_MAX_VALUE {
            return Err(JobSpecError::UpperBoundTooLarge {
                upper_bound: self.entity_id_value_upper_bound,
                max: ENTITY_ID_MAX_VALUE,
            });
        }
        Ok(())
    }
}
